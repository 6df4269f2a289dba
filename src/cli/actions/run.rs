use crate::cli::actions::{Action, serve};
use anyhow::Result;

/// Execute the provided action.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Serve(args) => serve::execute(args).await,
    }
}
