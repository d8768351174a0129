//! Account commands - register, login, verify-2fa, logout, whoami

use anyhow::{bail, Result};
use colored::Colorize;
use serde_json::json;

use super::{get_context, get_logger, log_event, print_json, read_password, read_text, require_user};
use crate::output;
use coinledger_core::services::{LogEvent, LoginOutcome, Session};
use coinledger_core::{Error, User};

pub fn register(username: Option<String>, email: Option<String>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();

    let username = read_text(username, "Username")?;
    let email = read_text(email, "Email")?;
    let password = read_password("Password")?;
    let confirm = read_password("Confirm password")?;
    if password != confirm {
        return Err(Error::validation("Passwords do not match").into());
    }

    let user = ctx.auth_service.register(&username, &email, &password)?;
    log_event(&logger, LogEvent::new("user_registered").with_command("register"));

    if json {
        return print_json(&user);
    }
    output::success(&format!("Account '{}' created", user.username));
    println!("Run 'coinledger login' to sign in.");
    Ok(())
}

pub fn login(username: Option<String>, code: Option<String>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();

    let username = read_text(username, "Username")?;
    let password = read_password("Password")?;

    let outcome = match ctx.auth_service.login(&username, &password) {
        Ok(outcome) => outcome,
        Err(e) => {
            log_event(
                &logger,
                LogEvent::new("login_failed").with_command("login").with_error(e.to_string()),
            );
            return Err(e);
        }
    };

    let user = match outcome {
        LoginOutcome::Authenticated(user) => user,
        LoginOutcome::TwoFactorRequired { user_id } => {
            log_event(&logger, LogEvent::new("login_2fa_required").with_command("login"));
            match code {
                Some(code) => match ctx.auth_service.verify_login_code(&user_id, &code) {
                    Ok(user) => user,
                    Err(e) => {
                        log_event(
                            &logger,
                            LogEvent::new("login_2fa_failed")
                                .with_command("login")
                                .with_error(e.to_string()),
                        );
                        return Err(e);
                    }
                },
                None => {
                    ctx.session_store.save(&Session::pending_2fa(user_id))?;
                    if json {
                        return print_json(&json!({"status": "two_factor_required"}));
                    }
                    output::warning("Two-factor authentication required.");
                    println!("Run 'coinledger verify-2fa <code>' with the code from your authenticator.");
                    return Ok(());
                }
            }
        }
    };

    ctx.session_store.save(&Session::authenticated(user.id))?;
    log_event(&logger, LogEvent::new("login_succeeded").with_command("login"));

    if json {
        return print_json(&json!({"status": "authenticated", "user": user}));
    }
    output::success(&format!("Logged in as {}", user.username));
    Ok(())
}

pub fn verify_2fa(code: Option<String>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let logger = get_logger();

    let session = ctx.session_store.load()?;
    let Some(user_id) = session.pending_user() else {
        bail!("No login is waiting for a 2FA code. Run 'coinledger login' first.");
    };

    let code = read_text(code, "Authenticator code")?;
    let user = match ctx.auth_service.verify_login_code(&user_id, &code) {
        Ok(user) => user,
        Err(e) => {
            log_event(
                &logger,
                LogEvent::new("login_2fa_failed")
                    .with_command("verify-2fa")
                    .with_error(e.to_string()),
            );
            return Err(e);
        }
    };

    ctx.session_store.save(&Session::authenticated(user.id))?;
    log_event(&logger, LogEvent::new("login_succeeded").with_command("verify-2fa"));

    if json {
        return print_json(&json!({"status": "authenticated", "user": user}));
    }
    output::success(&format!("Logged in as {}", user.username));
    Ok(())
}

pub fn logout() -> Result<()> {
    let ctx = get_context()?;
    ctx.session_store.clear()?;
    println!("Logged out.");
    Ok(())
}

pub fn whoami(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let user_id = require_user(&ctx)?;
    let user: User = ctx
        .repository
        .get_user_by_id(&user_id)?
        .ok_or_else(|| Error::not_found("Logged-in user no longer exists. Run 'coinledger logout'."))?;

    if json {
        return print_json(&json!({
            "user": user,
            "two_factor_enabled": user.two_factor_enabled(),
            "coinbase_credentials": user.has_coinbase_credentials(),
        }));
    }

    let yes_no = |b: bool| if b { "yes".green() } else { "no".dimmed() };
    println!("{}", user.username.bold());
    println!("  Email: {}", user.email);
    println!("  Member since: {}", user.created_at.format("%Y-%m-%d"));
    println!("  Two-factor: {}", yes_no(user.two_factor_enabled()));
    println!("  Coinbase credentials: {}", yes_no(user.has_coinbase_credentials()));
    Ok(())
}
