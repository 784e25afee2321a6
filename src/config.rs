use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,

    pub jwt_secret: String,
    pub jwt_access_ttl_secs: i64,

    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub revenuecat_webhook_secret: String,

    /// Product identifiers that count as the one-time lifetime purchase.
    pub lifetime_product_ids: Vec<String>,

    // Referrals
    pub referral_lifetime_threshold: i64,
    pub referral_credit_days: i32,
    pub referral_credit_cents: i64,

    // Reminders
    pub expo_access_token: Option<String>,
    pub reminders_enabled: bool,
    pub reminder_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            jwt_access_ttl_secs: env::var("JWT_ACCESS_TTL_SECS")
                .unwrap_or_else(|_| "86400".into())
                .parse()
                .expect("JWT_ACCESS_TTL_SECS must be a number"),

            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            revenuecat_webhook_secret: env::var("REVENUECAT_WEBHOOK_SECRET").unwrap_or_default(),

            lifetime_product_ids: parse_list(
                &env::var("LIFETIME_PRODUCT_IDS").unwrap_or_else(|_| "lifetime_access".into()),
            ),

            referral_lifetime_threshold: env::var("REFERRAL_LIFETIME_THRESHOLD")
                .unwrap_or_else(|_| "3".into())
                .parse()
                .unwrap_or(3),
            referral_credit_days: env::var("REFERRAL_CREDIT_DAYS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
            referral_credit_cents: env::var("REFERRAL_CREDIT_CENTS")
                .unwrap_or_else(|_| "999".into())
                .parse()
                .unwrap_or(999),

            expo_access_token: env::var("EXPO_ACCESS_TOKEN").ok().filter(|s| !s.is_empty()),
            reminders_enabled: env::var("REMINDERS_ENABLED")
                .unwrap_or_else(|_| "true".into())
                .parse()
                .unwrap_or(true),
            reminder_sweep_secs: env::var("REMINDER_SWEEP_SECS")
                .unwrap_or_else(|_| "900".into()) // 15 min
                .parse()
                .unwrap_or(900),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Width of the reminder firing window. Equal to the sweep period so a
    /// user falls inside exactly one sweep per day.
    pub fn reminder_window_minutes(&self) -> i64 {
        (self.reminder_sweep_secs / 60).max(1) as i64
    }

    /// Baseline for tests; every secret empty, every toggle off.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            host: "127.0.0.1".into(),
            port: 0,
            frontend_url: "http://localhost:3000".into(),
            jwt_secret: "test-secret".into(),
            jwt_access_ttl_secs: 900,
            stripe_secret_key: String::new(),
            stripe_webhook_secret: String::new(),
            revenuecat_webhook_secret: String::new(),
            lifetime_product_ids: vec!["lifetime_access".into()],
            referral_lifetime_threshold: 3,
            referral_credit_days: 30,
            referral_credit_cents: 999,
            expo_access_token: None,
            reminders_enabled: false,
            reminder_sweep_secs: 900,
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
