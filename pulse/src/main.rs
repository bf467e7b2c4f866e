use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use pulse::logging::{self, LogConfig};
use pulse::preferences::FilePreferenceStore;
use pulse::session::SessionStore;
use pulse::{
    log_backend_call, log_debug, log_realtime, log_settings, AdminConsole, Attachment, AuthStore,
    ClientError, ClientResult, Composer, Draft, FeedStore, NoticeBoard, NoticeLevel,
    NotificationStore, ProfileView, Recipients, Search, SearchKind, SearchResults, ThemeStore,
    TrendingStore,
};
use pulse_backend::{Backend, Settings};
use pulse_types::{MediaKind, Post, Profile, Theme, TrendingTopic};

/// Pulse - social feed, notifications and trending topics from the terminal
#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Command-line client for the Pulse social network")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Settings file (defaults to ./pulse.toml)
    #[arg(long, short, global = true, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PULSE_PASSWORD")]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in profile
    Whoami,
    #[command(subcommand)]
    Notifications(NotificationsCommand),
    #[command(subcommand)]
    Trending(TrendingCommand),
    #[command(subcommand)]
    Search(SearchCommand),
    /// Show the newest posts
    Feed {
        /// Keep running and reprint when someone posts
        #[arg(long)]
        watch: bool,
        /// Like or unlike a post before listing
        #[arg(long)]
        toggle_like: Option<Uuid>,
    },
    /// Publish a post with at least one attachment
    Post {
        content: String,
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long)]
        video: Option<PathBuf>,
        #[arg(long)]
        audio: Option<PathBuf>,
    },
    /// Show a profile and its posts (your own by default)
    Profile { username: Option<String> },
    #[command(subcommand)]
    Theme(ThemeCommand),
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Debug, Subcommand)]
enum NotificationsCommand {
    List,
    Read { id: Uuid },
    ReadAll,
    Delete { id: Uuid },
    /// Print notifications as they arrive
    Watch,
}

#[derive(Debug, Subcommand)]
enum TrendingCommand {
    Top {
        /// Keep refreshing every minute
        #[arg(long)]
        watch: bool,
    },
    Track { term: String },
    /// Remove search counters older than two days
    Cleanup,
}

#[derive(Debug, Subcommand)]
enum SearchCommand {
    Users { query: String },
    Posts { query: String },
}

#[derive(Debug, Subcommand)]
enum ThemeCommand {
    Show,
    Toggle,
    Set { theme: String },
}

#[derive(Debug, Subcommand)]
enum AdminCommand {
    Stats,
    Users,
    Reports,
    /// Send an admin notification to one user or everyone
    Notify {
        #[arg(long, conflicts_with = "all")]
        user: Option<Uuid>,
        #[arg(long)]
        all: bool,
        message: String,
    },
    Ban { id: Uuid },
    Verify { id: Uuid },
    DeletePost { id: Uuid },
}

struct App {
    backend: Arc<dyn Backend>,
    auth: AuthStore,
    session_store: SessionStore,
    notices: NoticeBoard,
    log_config: LogConfig,
}

/// How often `trending top --watch` refreshes
const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

// Load environment variables from .env file
fn load_env() {
    let _ = dotenv::dotenv();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    load_env();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    logging::init_logging(&log_config)?;

    // Theme lives on this device only
    if let Command::Theme(action) = &cli.command {
        return theme_command(action, &log_config);
    }

    let settings = Settings::load(cli.config.clone())?;
    log_settings!(log_config, "Backend: {:?}", settings.backend);
    let backend = pulse_backend::connect(&settings)?;

    let session_store = SessionStore::new()?;
    restore_session(&backend, &session_store).await?;

    let auth = AuthStore::new(backend.clone());
    if let Err(e) = auth.initialize().await {
        log::warn!("Could not load profile: {}", e);
    }

    let app = App {
        backend,
        auth,
        session_store,
        notices: NoticeBoard::new(),
        log_config,
    };
    let mut notices = app.notices.subscribe();

    log_debug!(app.log_config, "Backend ready, signed in: {}", app.auth.current_user().is_some());
    let result = app.run(cli.command).await;
    app.auth.shutdown();

    while let Ok(notice) = notices.try_recv() {
        match notice.level {
            NoticeLevel::Error => eprintln!("{}", notice.message),
            _ => println!("{}", notice.message),
        }
    }

    if let Err(e) = result {
        log::error!("Command failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn restore_session(backend: &Arc<dyn Backend>, store: &SessionStore) -> Result<()> {
    let Some(token) = store.load()? else {
        return Ok(());
    };

    match backend.restore_session(&token).await {
        Ok(Some(session)) => log::info!("Restored session for {}", session.user.id),
        Ok(None) => {
            log::info!("Stored session expired, removing it");
            store.delete()?;
        }
        Err(e) => log::warn!("Could not restore session: {}", e),
    }
    Ok(())
}

fn theme_command(action: &ThemeCommand, log_config: &LogConfig) -> Result<()> {
    let themes = ThemeStore::new(Arc::new(FilePreferenceStore::new()?));
    let current = themes.initialize();

    let theme = match action {
        ThemeCommand::Show => current,
        ThemeCommand::Toggle => themes.toggle()?,
        ThemeCommand::Set { theme } => {
            let theme = Theme::parse(theme)
                .ok_or_else(|| anyhow::anyhow!("Unknown theme '{}', expected light or dark", theme))?;
            themes.set(theme)?;
            theme
        }
    };
    log_settings!(log_config, "Theme is {}", theme.as_str());
    println!("{}", theme.as_str());
    Ok(())
}

impl App {
    fn require_profile(&self) -> ClientResult<Profile> {
        self.auth.profile().ok_or(ClientError::NotAuthenticated)
    }

    async fn run(&self, command: Command) -> ClientResult<()> {
        match command {
            Command::Login { email, password } => {
                log_backend_call!(self.log_config, "Signing in as {}", email);
                let result = self.auth.sign_in(&email, &password).await;
                if result.is_ok() {
                    if let Some(token) = self.auth.access_token().await {
                        self.session_store.save(&token)?;
                    }
                }
                let profile = self.report(result, "Signed in")?;
                println!("Welcome, {} (@{})", profile.display_name, profile.username);
                Ok(())
            }
            Command::Logout => {
                let result = self.auth.sign_out().await;
                self.session_store.delete()?;
                self.report(result, "Signed out")
            }
            Command::Whoami => {
                let profile = self.require_profile()?;
                print_profile(&profile);
                Ok(())
            }
            Command::Notifications(action) => self.notifications(action).await,
            Command::Trending(action) => self.trending(action).await,
            Command::Search(action) => self.search(action).await,
            Command::Feed { watch, toggle_like } => self.feed(watch, toggle_like).await,
            Command::Post { content, image, video, audio } => {
                let profile = self.require_profile()?;
                let mut draft = Draft::new(content);
                for (kind, path) in [
                    (MediaKind::Image, image),
                    (MediaKind::Video, video),
                    (MediaKind::Audio, audio),
                ] {
                    if let Some(path) = path {
                        draft = draft.with(kind, Attachment::from_path(path)?);
                    }
                }
                let result = Composer::new(self.backend.clone()).publish(profile.id, &draft).await;
                let post = self.report(result, "Post published")?;
                print_post(&post);
                Ok(())
            }
            Command::Profile { username } => {
                let username = match username {
                    Some(username) => username,
                    None => self.require_profile()?.username,
                };
                let view = ProfileView::load(&self.backend, &username).await?;
                print_profile(&view.profile);
                println!();
                for post in &view.posts {
                    print_post(post);
                }
                Ok(())
            }
            // Handled before connecting
            Command::Theme(_) => Ok(()),
            Command::Admin(action) => self.admin(action).await,
        }
    }

    async fn notifications(&self, action: NotificationsCommand) -> ClientResult<()> {
        let profile = self.require_profile()?;
        let store = NotificationStore::new(self.backend.clone());

        match action {
            NotificationsCommand::List => {
                store.load(profile.id).await?;
                let state = store.snapshot();
                println!("{} unread", state.unread_count);
                for n in &state.notifications {
                    let marker = if n.is_read { " " } else { "*" };
                    let sender = n.sender.as_ref().map(|s| s.username.as_str()).unwrap_or("pulse");
                    println!("{} {} [{}] @{}: {}", marker, n.id, n.kind.as_str(), sender, n.content);
                }
                Ok(())
            }
            NotificationsCommand::Read { id } => {
                let result = store.mark_read(id).await;
                self.report(result, "Marked as read")
            }
            NotificationsCommand::ReadAll => {
                let result = store.mark_all_read(profile.id).await;
                self.report(result, "All notifications marked as read")
            }
            NotificationsCommand::Delete { id } => {
                let result = store.delete(id).await;
                self.report(result, "Notification deleted")
            }
            NotificationsCommand::Watch => {
                let _subscription = store.initialize(profile.id).await?;
                let mut rx = store.watch();
                println!("{} unread. Waiting for notifications, Ctrl-C to stop.", store.unread_count());
                let mut seen = rx.borrow_and_update().notifications.len();
                loop {
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let state = rx.borrow_and_update().clone();
                            let fresh = state.notifications.len().saturating_sub(seen);
                            for n in state.notifications.iter().take(fresh) {
                                log_realtime!(self.log_config, "Notification {} received", n.id);
                                println!("* [{}] {} ({} unread)", n.kind.as_str(), n.content, state.unread_count);
                            }
                            seen = state.notifications.len();
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
                Ok(())
            }
        }
    }

    async fn trending(&self, action: TrendingCommand) -> ClientResult<()> {
        let store = TrendingStore::new(self.backend.clone());
        match action {
            TrendingCommand::Top { watch } => {
                store.fetch_top().await?;
                print_topics(&store.topics());
                if !watch {
                    return Ok(());
                }

                let mut rx = store.watch();
                let _refresh = store.spawn_refresh(REFRESH_INTERVAL);
                loop {
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let state = rx.borrow_and_update().clone();
                            if !state.loading {
                                println!("\n--- trending updated ---");
                                print_topics(&state.topics);
                            }
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
                Ok(())
            }
            TrendingCommand::Track { term } => {
                match store.track_search(&term).await? {
                    Some(count) => println!("'{}' searched {} times today", term.trim().to_lowercase(), count),
                    None => println!("Search terms need at least two characters"),
                }
                Ok(())
            }
            TrendingCommand::Cleanup => {
                let result = store.cleanup().await;
                self.report(result, "Old search counters removed")
            }
        }
    }

    async fn search(&self, action: SearchCommand) -> ClientResult<()> {
        let search = Search::new(self.backend.clone(), TrendingStore::new(self.backend.clone()));
        let (kind, query) = match action {
            SearchCommand::Users { query } => (SearchKind::Users, query),
            SearchCommand::Posts { query } => (SearchKind::Posts, query),
        };

        match search.search(kind, &query).await? {
            SearchResults::Users(users) => users.iter().for_each(print_profile),
            SearchResults::Posts(posts) => posts.iter().for_each(print_post),
        }
        Ok(())
    }

    async fn feed(&self, watch: bool, toggle_like: Option<Uuid>) -> ClientResult<()> {
        let feed = FeedStore::new(self.backend.clone());
        feed.load().await?;

        if let Some(post_id) = toggle_like {
            let profile = self.require_profile()?;
            let liked = feed.toggle_like(profile.id, post_id).await?;
            self.notices.success(if liked { "Liked" } else { "Like removed" });
        }

        feed.posts().iter().for_each(print_post);
        if !watch {
            return Ok(());
        }

        let _subscription = feed.subscribe().await?;
        let mut rx = feed.watch();
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let posts = rx.borrow_and_update().posts.clone();
                    log_realtime!(self.log_config, "Feed reloaded with {} posts", posts.len());
                    println!("\n--- feed updated ---");
                    posts.iter().for_each(print_post);
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }

    async fn admin(&self, action: AdminCommand) -> ClientResult<()> {
        let console = AdminConsole::new(self.backend.clone(), &self.require_profile()?)?;

        match action {
            AdminCommand::Stats => {
                let stats = console.stats().await?;
                println!("Users:    {}", stats.total_users);
                println!("Posts:    {}", stats.total_posts);
                println!("Verified: {}", stats.verified_accounts);
                Ok(())
            }
            AdminCommand::Users => {
                console.users().await?.iter().for_each(print_profile);
                Ok(())
            }
            AdminCommand::Reports => {
                for report in console.reports().await? {
                    let reporter = report.reporter.as_ref().map(|r| r.username.as_str()).unwrap_or("unknown");
                    println!("{} by @{}: {}", report.id, reporter, report.reason);
                }
                Ok(())
            }
            AdminCommand::Notify { user, all, message } => {
                let recipients = match (user, all) {
                    (_, true) => Recipients::Everyone,
                    (Some(id), false) => Recipients::User(id),
                    (None, false) => {
                        return self.report::<()>(
                            Err(ClientError::validation("Choose a user with --user or pass --all")),
                            "",
                        );
                    }
                };
                let result = console.send_notification(recipients, &message).await;
                let sent = self.report(result, "Notification sent")?;
                println!("Sent to {} users", sent);
                Ok(())
            }
            AdminCommand::Ban { id } => {
                let result = console.ban_user(id).await;
                self.report(result, "Account banned").map(|_| ())
            }
            AdminCommand::Verify { id } => {
                let result = console.verify_user(id).await;
                self.report(result, "Account verified").map(|_| ())
            }
            AdminCommand::DeletePost { id } => {
                let result = console.delete_post(id).await;
                self.report(result, "Post deleted")
            }
        }
    }

    fn report<T>(&self, result: ClientResult<T>, success: &str) -> ClientResult<T> {
        self.notices.report(&result, success);
        result
    }
}

fn print_profile(profile: &Profile) {
    let badge = if profile.is_verified { " ✓" } else { "" };
    let flags = match (profile.is_admin, profile.is_banned) {
        (_, true) => " [banned]",
        (true, false) => " [admin]",
        _ => "",
    };
    println!("{} (@{}){}{}  {}", profile.display_name, profile.username, badge, flags, profile.id);
    if let Some(bio) = profile.bio.as_deref().filter(|b| !b.is_empty()) {
        println!("  {}", bio);
    }
}

fn print_topics(topics: &[TrendingTopic]) {
    if topics.is_empty() {
        println!("Nothing is trending right now");
    }
    for (rank, topic) in topics.iter().enumerate() {
        println!("{:>2}. {} ({} searches)", rank + 1, topic.query, topic.search_count);
    }
}

fn print_post(post: &Post) {
    let author = post
        .author
        .as_ref()
        .map(|a| a.username.as_str())
        .unwrap_or("unknown");
    println!(
        "{}  @{}  {}  ♥ {}",
        post.created_at.format("%Y-%m-%d %H:%M"),
        author,
        post.id,
        post.likes_count
    );
    println!("  {}", post.content);
    for url in [&post.image_url, &post.video_url, &post.audio_url].into_iter().flatten() {
        println!("  {}", url);
    }
}

