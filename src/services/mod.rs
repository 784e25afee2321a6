pub mod billing;
pub mod clock;
pub mod push;
pub mod recovery_score;
pub mod referral;
pub mod reminder;
pub mod subscription;
