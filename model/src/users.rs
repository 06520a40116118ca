//! Administrators and their sessions.

use crate::{
    auth,
    error::Error,
    schema::{self, User},
    sql::db::{Assignments, Connection},
    validate, Context,
};
use serde::{Deserialize, Serialize};

const NOT_FOUND: &str = "User not found!";
const EMAIL_TAKEN: &str = "User already exists";
const WRONG_PASSWORD: &str = "Password does not match";
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Login {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// A successful login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Check a user's credentials and issue a session token.
pub async fn login<C: Connection>(ctx: &Context<C>, req: Login) -> Result<Session, Error> {
    let email = validate::email(validate::required(req.email)?)?;
    let password = validate::required(req.password)?;

    let user: User = schema::find_by(&ctx.conn, "email", email)
        .await?
        .ok_or_else(|| Error::unauthorized("User not found"))?;
    if !auth::verify_password(&password, &user.password_hash) {
        return Err(Error::unauthorized(WRONG_PASSWORD));
    }
    let token = ctx.keys.issue(user.id)?;
    tracing::info!(user = user.id, "login");
    Ok(Session { user, token })
}

/// All users, newest first.
pub async fn list<C: Connection>(ctx: &Context<C>) -> Result<Vec<User>, Error> {
    schema::all(&ctx.conn).await
}

pub async fn get<C: Connection>(ctx: &Context<C>, id: i32) -> Result<User, Error> {
    schema::require(&ctx.conn, id, NOT_FOUND).await
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn create<C: Connection>(ctx: &Context<C>, req: NewUser) -> Result<User, Error> {
    let name = validate::required_text(req.name)?;
    let email = validate::email(validate::required(req.email)?)?;
    let password = validate::min_len(validate::required(req.password)?, MIN_PASSWORD_LEN)?;

    if schema::find_by::<User, _>(&ctx.conn, "email", email.as_str())
        .await?
        .is_some()
    {
        return Err(Error::conflict(EMAIL_TAKEN));
    }
    let user: User = schema::create(
        &ctx.conn,
        vec![
            ("name", name.into()),
            ("email", email.into()),
            ("password_hash", auth::hash_password(&password)?.into()),
        ],
    )
    .await?;
    tracing::info!(user = user.id, "created user");
    Ok(user)
}

/// Changes to the authenticated user's own account.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub old_password: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

/// Update the account of the authenticated user `id`.
///
/// A new password must come with the current one and with a matching confirmation.
pub async fn update<C: Connection>(
    ctx: &Context<C>,
    id: i32,
    req: UserUpdate,
) -> Result<User, Error> {
    let name = validate::optional_text(req.name)?;
    let email = req.email.map(validate::email).transpose()?;
    let password = req
        .password
        .map(|password| validate::min_len(password, MIN_PASSWORD_LEN))
        .transpose()?;
    if password.is_some()
        && (req.old_password.is_none() || req.confirm_password != password)
    {
        return Err(Error::validation_fails());
    }

    let user = get(ctx, id).await?;
    if let Some(email) = &email {
        if *email != user.email
            && schema::find_by::<User, _>(&ctx.conn, "email", email.as_str())
                .await?
                .is_some()
        {
            return Err(Error::conflict(EMAIL_TAKEN));
        }
    }
    if let Some(old_password) = &req.old_password {
        if !auth::verify_password(old_password, &user.password_hash) {
            return Err(Error::unauthorized(WRONG_PASSWORD));
        }
    }

    let mut values: Assignments = vec![];
    if let Some(name) = name {
        values.push(("name", name.into()));
    }
    if let Some(email) = email {
        values.push(("email", email.into()));
    }
    if let Some(password) = password {
        values.push(("password_hash", auth::hash_password(&password)?.into()));
    }
    schema::update(&ctx.conn, id, values)
        .await?
        .ok_or_else(|| Error::not_found(NOT_FOUND))
}

/// Delete a user, returning the remaining users.
pub async fn delete<C: Connection>(ctx: &Context<C>, id: i32) -> Result<Vec<User>, Error> {
    if !schema::delete::<User, _>(&ctx.conn, id).await? {
        return Err(Error::not_found(NOT_FOUND));
    }
    tracing::info!(user = id, "deleted user");
    list(ctx).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::Harness;

    fn login_as(email: &str, password: &str) -> Login {
        Login {
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    #[async_std::test]
    async fn test_login() {
        let h = Harness::new().await;
        let admin = h.user("Admin", "admin@fastfeet.com", "123456").await;

        let session = login(&h.ctx, login_as("admin@fastfeet.com", "123456"))
            .await
            .unwrap();
        assert_eq!(session.user, admin);
        assert_eq!(h.ctx.keys.verify(&session.token).unwrap().id, admin.id);

        assert_eq!(
            login(&h.ctx, login_as("admin@fastfeet.com", "654321"))
                .await
                .unwrap_err(),
            Error::unauthorized("Password does not match")
        );
        assert_eq!(
            login(&h.ctx, login_as("nobody@fastfeet.com", "123456"))
                .await
                .unwrap_err(),
            Error::unauthorized("User not found")
        );
        assert_eq!(
            login(&h.ctx, login_as("not an email", "123456"))
                .await
                .unwrap_err(),
            Error::validation_fails()
        );
    }

    #[async_std::test]
    async fn test_session_hides_password() {
        let h = Harness::new().await;
        h.user("Admin", "admin@fastfeet.com", "123456").await;
        let session = login(&h.ctx, login_as("admin@fastfeet.com", "123456"))
            .await
            .unwrap();
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["user"]["email"], "admin@fastfeet.com");
        assert!(json["user"].get("password_hash").is_none());
    }

    #[async_std::test]
    async fn test_create() {
        let h = Harness::new().await;
        let req = NewUser {
            name: Some("Diego".into()),
            email: Some("diego@fastfeet.com".into()),
            password: Some("123456".into()),
        };
        let user = create(&h.ctx, req.clone()).await.unwrap();
        assert_eq!(user.name, "Diego");
        assert_eq!(get(&h.ctx, user.id).await.unwrap(), user);
        login(&h.ctx, login_as("diego@fastfeet.com", "123456"))
            .await
            .unwrap();

        assert_eq!(
            create(&h.ctx, req.clone()).await.unwrap_err(),
            Error::conflict("User already exists")
        );
        assert_eq!(
            create(
                &h.ctx,
                NewUser {
                    password: Some("12345".into()),
                    email: Some("other@fastfeet.com".into()),
                    ..req
                }
            )
            .await
            .unwrap_err(),
            Error::validation_fails()
        );
    }

    #[async_std::test]
    async fn test_update() {
        let h = Harness::new().await;
        let admin = h.user("Admin", "admin@fastfeet.com", "123456").await;
        h.user("Other", "other@fastfeet.com", "123456").await;

        let renamed = update(
            &h.ctx,
            admin.id,
            UserUpdate {
                name: Some("Distribuidora FastFeet".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(renamed.name, "Distribuidora FastFeet");
        assert_eq!(renamed.email, "admin@fastfeet.com");

        assert_eq!(
            update(
                &h.ctx,
                admin.id,
                UserUpdate {
                    email: Some("other@fastfeet.com".into()),
                    ..Default::default()
                }
            )
            .await
            .unwrap_err(),
            Error::conflict("User already exists")
        );

        // Password changes need the old password and a matching confirmation.
        let change = |old: &str, new: &str, confirm: &str| UserUpdate {
            old_password: Some(old.into()),
            password: Some(new.into()),
            confirm_password: Some(confirm.into()),
            ..Default::default()
        };
        assert_eq!(
            update(&h.ctx, admin.id, change("123456", "abcdef", "abcdeg"))
                .await
                .unwrap_err(),
            Error::validation_fails()
        );
        assert_eq!(
            update(&h.ctx, admin.id, change("654321", "abcdef", "abcdef"))
                .await
                .unwrap_err(),
            Error::unauthorized("Password does not match")
        );
        assert_eq!(
            update(
                &h.ctx,
                admin.id,
                UserUpdate {
                    password: Some("abcdef".into()),
                    confirm_password: Some("abcdef".into()),
                    ..Default::default()
                }
            )
            .await
            .unwrap_err(),
            Error::validation_fails()
        );
        update(&h.ctx, admin.id, change("123456", "abcdef", "abcdef"))
            .await
            .unwrap();
        login(&h.ctx, login_as("admin@fastfeet.com", "abcdef"))
            .await
            .unwrap();
    }

    #[async_std::test]
    async fn test_delete() {
        let h = Harness::new().await;
        let a = h.user("A", "a@fastfeet.com", "123456").await;
        let b = h.user("B", "b@fastfeet.com", "123456").await;
        let c = h.user("C", "c@fastfeet.com", "123456").await;

        assert_eq!(delete(&h.ctx, b.id).await.unwrap(), vec![c, a]);
        assert_eq!(
            delete(&h.ctx, b.id).await.unwrap_err(),
            Error::not_found("User not found!")
        );
        assert_eq!(
            get(&h.ctx, b.id).await.unwrap_err(),
            Error::not_found("User not found!")
        );
    }
}
