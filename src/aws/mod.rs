//! AWS plumbing shared by the stores.

#[cfg(feature = "aws_dynamodb")]
pub mod dynamodb;

/// Loads the AWS SDK configuration from the default provider chain.
pub async fn load_sdk_config() -> aws_config::SdkConfig {
    tracing::info!("Loading AWS configuration...");
    aws_config::load_from_env().await
}

#[cfg(test)]
pub mod test {
    use rand::random;

    /// A unique suffix for resources created by AWS-backed tests.
    pub fn test_run_id() -> String {
        let unique_id = random::<u32>();
        if let Ok(run) = std::env::var("TEST_RUN_ID") {
            format!("{}-{}", run, unique_id)
        } else {
            format!("{}", unique_id)
        }
    }
}
