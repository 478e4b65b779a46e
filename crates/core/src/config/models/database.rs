use serde::{Deserialize, Serialize};

/// Job Store 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://orchestrator.db".to_string(),
            max_connections: 5,
            min_connections: 1,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        if !self.url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!("数据库URL必须是SQLite格式: {}", self.url));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}
