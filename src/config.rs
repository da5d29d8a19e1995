use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "jobscout", about = "Tiered job-discovery pipeline")]
pub struct Config {
    /// Listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Expected JWT issuer URL
    #[arg(long, env = "AUTH_ISSUER", default_value = "")]
    pub auth_issuer: String,

    /// Shared HS256 key for bearer-token verification
    #[arg(long, env = "AUTH_SECRET")]
    pub auth_secret: Option<String>,

    /// Comma-separated CORS origin allow-list
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "http://localhost:5173")]
    pub allowed_origins: String,

    /// Credential for the external enrichment collaborator
    #[arg(long, env = "ENRICHMENT_API_KEY")]
    pub enrichment_api_key: Option<String>,

    /// WebDriver endpoint for tier-3 browser validation
    #[arg(long, env = "WEBDRIVER_URL")]
    pub webdriver_url: Option<String>,

    /// Monthly request quota reported by /scraper/quota
    #[arg(long, env = "MONTHLY_QUOTA", default_value = "100")]
    pub monthly_quota: u32,

    /// Verbose error responses and debug logging
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

impl Config {
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}
