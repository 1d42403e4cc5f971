use anyhow::{Result, bail};
use tracing::info;

use crate::users_repo::UsersRepository;
use crate::web::PgPool;

/// Create an admin account, or promote the user if the email already
/// exists.
pub async fn handle_create_admin(
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    pool: PgPool,
) -> Result<()> {
    let users_repo = UsersRepository::new(pool);

    if let Some(existing) = users_repo.get_by_email(&email).await? {
        if existing.is_admin {
            info!("{} is already an admin", existing.email);
            return Ok(());
        }
        users_repo.set_admin(existing.id, true).await?;
        info!("Promoted {} to admin", existing.email);
        return Ok(());
    }

    if password.len() < 8 {
        bail!("password must be at least 8 characters");
    }

    let user = users_repo
        .create(&email, &password, &first_name, &last_name)
        .await?;
    users_repo.set_admin(user.id, true).await?;
    info!("Created admin account {}", user.email);

    Ok(())
}
