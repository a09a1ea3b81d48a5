use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use spin_sdk::http::Request;
use tracing::{info, warn};

use crate::auth::{authenticate, RequestContext};
use crate::config::*;
use crate::core::errors::AppError;
use crate::core::form::{get_string, parse_form, FieldErrors};
use crate::core::helpers::hash_password;
use crate::core::reply::Reply;
use crate::models::models::{FlashLevel, User};
use crate::posts::post_cards;
use crate::router::PathParams;
use crate::templates;

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Regex should compile")
    })
}

#[derive(Debug, Default)]
pub struct RegistrationForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            username: get_string(fields, "username").trim().to_string(),
            email: get_string(fields, "email").trim().to_string(),
            password: get_string(fields, "password"),
            confirm_password: get_string(fields, "confirm_password"),
        }
    }

    /// Field checks that need no storage access.
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::default();

        let username_len = self.username.chars().count();
        if self.username.is_empty() {
            errors.add("username", "This field is required.");
        } else if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&username_len) {
            errors.add(
                "username",
                format!("Field must be between {} and {} characters long.", MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH),
            );
        }

        if self.email.is_empty() {
            errors.add("email", "This field is required.");
        } else if !email_regex().is_match(&self.email) {
            errors.add("email", "Invalid email address.");
        }

        if self.password.is_empty() {
            errors.add("password", "This field is required.");
        } else if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add("password", format!("Field must be at least {} characters long.", MIN_PASSWORD_LENGTH));
        }

        if self.confirm_password.is_empty() {
            errors.add("confirm_password", "This field is required.");
        } else if self.confirm_password != self.password {
            errors.add("confirm_password", "Field must be equal to password.");
        }

        errors
    }
}

#[derive(Debug, Default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

impl LoginForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            username: get_string(fields, "username").trim().to_string(),
            password: get_string(fields, "password"),
        }
    }

    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::default();
        if self.username.is_empty() {
            errors.add("username", "This field is required.");
        }
        if self.password.is_empty() {
            errors.add("password", "This field is required.");
        }
        errors
    }
}

pub fn register_form(ctx: &mut RequestContext, _req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    if ctx.actor.is_some() {
        return Ok(Reply::redirect("/"));
    }
    templates::register_page(ctx, "", "", &FieldErrors::default(), 200)
}

pub fn register(ctx: &mut RequestContext, req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    if ctx.actor.is_some() {
        return Ok(Reply::redirect("/"));
    }

    let form = RegistrationForm::from_fields(&parse_form(req.body()));
    let mut errors = form.validate();

    if !errors.has("username") && ctx.db.username_taken(&form.username)? {
        errors.add("username", "That username is taken. Please choose a different one.");
    }
    if !errors.has("email") && ctx.db.email_taken(&form.email)? {
        errors.add("email", "That email is already registered.");
    }

    if !errors.is_empty() {
        return templates::register_page(ctx, &form.username, &form.email, &errors, 400);
    }

    let user = ctx
        .db
        .insert_user(&form.username, &form.email, &hash_password(&form.password)?)?;
    info!(user_id = %user.id, username = %user.username, "user registered");

    ctx.flash(FlashLevel::Success, "Your account has been created! You can now log in.");
    Ok(Reply::redirect("/login"))
}

pub fn login_form(ctx: &mut RequestContext, _req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    if ctx.actor.is_some() {
        return Ok(Reply::redirect("/"));
    }
    templates::login_page(ctx, "", &FieldErrors::default(), 200)
}

pub fn login(ctx: &mut RequestContext, req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    if ctx.actor.is_some() {
        return Ok(Reply::redirect("/"));
    }

    let form = LoginForm::from_fields(&parse_form(req.body()));
    let errors = form.validate();
    if !errors.is_empty() {
        return templates::login_page(ctx, &form.username, &errors, 400);
    }

    match authenticate(&ctx.db, &form.username, &form.password) {
        Ok(user) => {
            ctx.login(user)?;
            ctx.flash(FlashLevel::Success, "Login successful!");
            Ok(Reply::redirect("/"))
        }
        Err(AppError::Authentication) => {
            warn!(username = %form.username, "login failed");
            ctx.flash(FlashLevel::Danger, AppError::Authentication.to_string());
            templates::login_page(ctx, &form.username, &FieldErrors::default(), 401)
        }
        Err(e) => Err(e),
    }
}

pub fn logout(ctx: &mut RequestContext, _req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    ctx.logout()?;
    Ok(Reply::redirect("/"))
}

pub fn profile(ctx: &mut RequestContext, actor: &User, _req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    let posts = ctx.db.posts_by_user(&actor.id)?;
    let cards = post_cards(ctx, posts)?;
    templates::profile_page(ctx, actor, &cards)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(username: &str, email: &str, password: &str, confirm: &str) -> RegistrationForm {
        RegistrationForm {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            confirm_password: confirm.into(),
        }
    }

    #[test]
    fn valid_registration_has_no_errors() {
        assert!(form("ann", "ann@example.com", "secret1", "secret1").validate().is_empty());
    }

    #[test]
    fn registration_field_rules() {
        let errors = form("a", "not-an-email", "short", "other").validate();
        assert!(errors.has("username"));
        assert!(errors.has("email"));
        assert!(errors.has("password"));
        assert!(errors.has("confirm_password"));

        let errors = form(&"x".repeat(MAX_USERNAME_LENGTH + 1), "", "", "").validate();
        assert!(errors.has("username"));
        assert_eq!(errors.for_field("email").next(), Some("This field is required."));
    }

    #[test]
    fn login_requires_both_fields() {
        let fields = parse_form(b"username=ann");
        let errors = LoginForm::from_fields(&fields).validate();
        assert!(!errors.has("username"));
        assert!(errors.has("password"));
    }
}
