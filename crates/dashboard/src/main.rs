mod logging;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use dashboard_core::auth::{
    parse_callback, AuthApi, AuthGuard, FileStorage, GuardView, HttpAuthApi, LoginRedirect,
    LoginTrigger, SessionSnapshot, SessionStatus, SessionStore, UserProfile,
};
use dashboard_core::config::ClientConfig;
use tracing::debug;
use url::Url;

const DEFAULT_PROFILE: &str = "default";
const AVATAR_SIZE: u32 = 64;

type Store = SessionStore<HttpAuthApi, FileStorage>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Admin dashboard session CLI")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Base URL of the dashboard REST API
    #[arg(long = "api-url", global = true)]
    api_url: Option<Url>,
    /// External OAuth login endpoint
    #[arg(long = "login-url", global = true)]
    login_url: Option<Url>,
    /// Profile name for stored sessions
    #[arg(long, global = true, default_value = DEFAULT_PROFILE)]
    profile: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Session commands
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Evaluate a route guard for a path
    Guard(GuardArgs),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Validate the stored session and show who is signed in
    Status(StatusArgs),
    /// Start a login through the external OAuth provider
    Login(LoginArgs),
    /// Finish a login with the URL the provider redirected to
    Callback(CallbackArgs),
    /// Sign the active account out
    Logout,
    /// Make another remembered account active
    Switch(SwitchArgs),
    /// List remembered accounts
    Accounts(AccountsArgs),
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Path to return to after signing in
    #[arg(long = "return-to", default_value = "/")]
    return_to: String,
    /// Open the login page in the system browser
    #[arg(long)]
    open: bool,
}

#[derive(Args, Debug)]
struct CallbackArgs {
    /// Full callback URL, including the token and state parameters
    url: Url,
}

#[derive(Args, Debug)]
struct SwitchArgs {
    /// User id of the remembered account
    user_id: String,
}

#[derive(Args, Debug)]
struct AccountsArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct GuardArgs {
    /// Path being rendered
    path: String,
    /// Guest-only guard (e.g. the login page)
    #[arg(long, conflicts_with = "optional")]
    guest: bool,
    /// Where guest-only guards send signed-in users
    #[arg(long = "redirect-to", default_value = "/dashboard")]
    redirect_to: String,
    /// Render children whether or not the user is signed in
    #[arg(long)]
    optional: bool,
    /// Text rendered instead of the page when signed out
    #[arg(long)]
    fallback: Option<String>,
    /// Do not offer a login prompt when signed out
    #[arg(long = "no-prompt")]
    no_prompt: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = client_config(&cli.global);
    match cli.command {
        Commands::Auth(cmd) => match cmd {
            AuthCommand::Status(args) => auth_status(&cli.global, &config, args).await?,
            AuthCommand::Login(args) => auth_login(&cli.global, &config, args)?,
            AuthCommand::Callback(args) => auth_callback(&cli.global, &config, args).await?,
            AuthCommand::Logout => auth_logout(&cli.global, &config).await?,
            AuthCommand::Switch(args) => auth_switch(&cli.global, &config, args)?,
            AuthCommand::Accounts(args) => auth_accounts(&cli.global, &config, args)?,
        },
        Commands::Guard(args) => guard(&cli.global, &config, args).await?,
    }
    Ok(())
}

fn client_config(global: &GlobalArgs) -> ClientConfig {
    let mut config = ClientConfig::default();
    if let Some(api_url) = &global.api_url {
        config = config.with_api_base(api_url.clone());
    }
    if let Some(login_url) = &global.login_url {
        config = config.with_login_url(login_url.clone());
    }
    config
}

fn open_storage(global: &GlobalArgs) -> Result<FileStorage> {
    FileStorage::for_profile(&global.profile)
        .with_context(|| format!("unable to open storage for profile '{}'", global.profile))
}

fn open_store(global: &GlobalArgs, config: &ClientConfig) -> Result<(Store, FileStorage)> {
    let storage = open_storage(global)?;
    let api = HttpAuthApi::new(&config.api_base).context("failed to build auth API client")?;
    let store = SessionStore::new(api, storage.clone());
    store.subscribe(|n| {
        debug!(event = ?n.event, status = %n.snapshot.status, revision = n.snapshot.revision, "session transition");
    });
    Ok((store, storage))
}

async fn auth_status(global: &GlobalArgs, config: &ClientConfig, args: StatusArgs) -> Result<()> {
    let (store, _) = open_store(global, config)?;
    store.check_auth().await;
    let snapshot = store.snapshot();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        render_snapshot(&snapshot);
    }
    Ok(())
}

fn auth_login(global: &GlobalArgs, config: &ClientConfig, args: LoginArgs) -> Result<()> {
    let storage = open_storage(global)?;
    let trigger = LoginTrigger::new(config.login_url.clone());
    let redirect = trigger.begin(&args.return_to);
    redirect
        .save(&storage)
        .context("failed to remember pending login")?;

    println!("\nSign in by visiting:\n  {}\n", redirect.url);
    println!("Then run `dashboard auth callback <URL>` with the address you were redirected to.");

    if args.open {
        if let Err(err) = open::that(redirect.url.as_str()) {
            eprintln!("Failed to launch browser ({err}); open the URL above manually.");
        }
    }
    Ok(())
}

async fn auth_callback(
    global: &GlobalArgs,
    config: &ClientConfig,
    args: CallbackArgs,
) -> Result<()> {
    let (store, storage) = open_store(global, config)?;
    let pending = LoginRedirect::take(&storage)
        .context("failed to read pending login")?
        .ok_or_else(|| anyhow!("no login in progress; run `dashboard auth login` first"))?;
    let callback = parse_callback(&args.url, Some(&pending.state))?;

    let user = store
        .api()
        .who_am_i(&callback.token)
        .await
        .context("failed to resolve the signed-in user")?;
    store
        .complete_login(callback.token, user.clone())
        .context("login callback rejected")?;

    println!("Signed in as {}.", user.display_name());
    println!("Continue at {}", pending.return_to);
    Ok(())
}

async fn auth_logout(global: &GlobalArgs, config: &ClientConfig) -> Result<()> {
    let (store, _) = open_store(global, config)?;
    // Resolve the active user first so the confirmation can name them.
    let user = match store.check_auth().await {
        SessionStatus::Authenticated => store.snapshot().user,
        _ => None,
    };
    store.perform_logout().await;
    match user {
        Some(user) => println!("Signed out {}.", user.display_name()),
        None => println!("No active session for profile '{}'.", global.profile),
    }
    Ok(())
}

fn auth_switch(global: &GlobalArgs, config: &ClientConfig, args: SwitchArgs) -> Result<()> {
    let (store, _) = open_store(global, config)?;
    store.switch_account(&args.user_id)?;
    if let Some(user) = store.snapshot().user {
        println!("Switched to {} ({}).", user.display_name(), user.id);
    }
    Ok(())
}

fn auth_accounts(global: &GlobalArgs, config: &ClientConfig, args: AccountsArgs) -> Result<()> {
    let (store, _) = open_store(global, config)?;
    let accounts = store.accounts();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
    } else {
        render_account_list(&accounts);
    }
    Ok(())
}

async fn guard(global: &GlobalArgs, config: &ClientConfig, args: GuardArgs) -> Result<()> {
    let (store, _) = open_store(global, config)?;

    let guard: AuthGuard<String> = if args.guest {
        AuthGuard::guest_only(args.redirect_to.clone())
    } else if args.optional {
        AuthGuard::optional()
    } else {
        let mut guard = AuthGuard::required();
        if !args.no_prompt {
            guard = guard.with_login_prompt(LoginTrigger::new(config.login_url.clone()));
        }
        if let Some(fallback) = args.fallback.clone() {
            guard = guard.with_fallback(fallback);
        }
        guard
    };

    guard.mount(&store).await;
    let snapshot = store.snapshot();
    match guard.view(&snapshot, &args.path) {
        GuardView::Loading => println!("Checking session…"),
        GuardView::Children => println!("Render {}", args.path),
        GuardView::Fallback(text) => println!("{text}"),
        GuardView::LoginPrompt(prompt) => {
            println!("Sign in to continue to {}:", prompt.return_to);
            println!("  {}", prompt.login_url);
        }
        GuardView::Nothing => {}
        GuardView::Redirect(to) => println!("Redirect to {to}"),
    }
    if let Some(error) = &snapshot.last_error {
        eprintln!("{error}");
    }
    Ok(())
}

fn render_snapshot(snapshot: &SessionSnapshot) {
    println!("Status    : {}", snapshot.status);
    if let Some(user) = &snapshot.user {
        render_user(user);
    }
    if snapshot.accounts.len() > 1 {
        println!("Accounts  : {}", snapshot.accounts.len());
    }
    if let Some(error) = &snapshot.last_error {
        println!("Error     : {}", error);
    }
}

fn render_user(user: &UserProfile) {
    println!("User ID   : {}", user.id);
    println!("Name      : {}", user.display_name());
    println!("Username  : {}", user.username);
    if let Some(email) = &user.email {
        println!("Email     : {}", email);
    }
    println!("Avatar    : {}", user.avatar_url(AVATAR_SIZE));
    if let Some(profile_url) = &user.profile_url {
        println!("Profile   : {}", profile_url);
    }
}

fn render_account_list(accounts: &[UserProfile]) {
    if accounts.is_empty() {
        println!("No remembered accounts.");
        return;
    }
    println!("{:<24} {:<24} {:<32}", "ID", "NAME", "EMAIL");
    println!("{}", "-".repeat(80));
    for user in accounts {
        println!(
            "{:<24} {:<24} {:<32}",
            truncate(&user.id, 24),
            truncate(user.display_name(), 24),
            truncate(user.email.as_deref().unwrap_or("-"), 32)
        );
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    let mut chars = value.chars();
    let mut collected = String::new();
    for _ in 0..max_len.saturating_sub(1) {
        match chars.next() {
            Some(ch) => collected.push(ch),
            None => return value.to_owned(),
        }
    }
    if chars.next().is_some() {
        collected.push('…');
        collected
    } else {
        value.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_marks_cut_values() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "dashboard",
            "auth",
            "status",
            "--profile",
            "work",
            "--api-url",
            "https://admin.example.com/api",
        ])
        .unwrap();
        assert_eq!(cli.global.profile, "work");
        let config = client_config(&cli.global);
        assert_eq!(config.api_base.as_str(), "https://admin.example.com/api");
        assert_eq!(config.login_url, ClientConfig::default().login_url);
        assert!(matches!(
            cli.command,
            Commands::Auth(AuthCommand::Status(StatusArgs { json: false }))
        ));
    }

    #[test]
    fn endpoints_default_without_flags() {
        let cli = Cli::try_parse_from(["dashboard", "auth", "accounts"]).unwrap();
        assert_eq!(cli.global.profile, DEFAULT_PROFILE);
        assert_eq!(client_config(&cli.global), ClientConfig::default());
    }

    #[test]
    fn guard_flags_conflict() {
        assert!(Cli::try_parse_from(["dashboard", "guard", "/", "--guest", "--optional"]).is_err());
    }
}
