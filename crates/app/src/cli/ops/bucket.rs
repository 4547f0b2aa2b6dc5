use clap::Args;

use common::bucket::{BucketResolver, Sha256Resolver};
use sharedrop::state::AppState;

/// Print the bucket a password stores its shares in
#[derive(Args, Debug, Clone)]
pub struct Bucket {
    pub password: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    #[error("password must not be empty")]
    EmptyPassword,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Bucket {
    type Error = BucketError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        if self.password.is_empty() {
            return Err(BucketError::EmptyPassword);
        }
        let bucket_id = Sha256Resolver.resolve(&self.password);

        // the mapping is pure, the allow-list check is informational
        let mut output = bucket_id.to_string();
        if let Ok(state) = AppState::load(ctx.config_path.clone()) {
            if !state.settings.is_authorized(&self.password) {
                output.push_str(" (password is not on the allow-list)");
            }
        }
        Ok(output)
    }
}
