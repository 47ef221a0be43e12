use cucumber::World;
use serde_json::Value;

#[derive(Debug, Default, World)]
pub struct CertWorld {
    /// Base URL of the server under test, injected by the runner.
    pub server_addr: Option<String>,
    pub client: reqwest::Client,

    pub status: Option<u16>,
    pub response: Option<Value>,
    pub concurrent: Vec<Value>,
}

impl CertWorld {
    pub fn server_addr(&self) -> &str {
        self.server_addr
            .as_deref()
            .expect("server_addr must be set before the scenario runs")
    }

    pub fn response(&self) -> &Value {
        self.response.as_ref().expect("no response")
    }
}
