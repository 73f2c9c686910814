use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley::credentials::CredentialStore;
use parley::directory::HttpDirectory;
use parley::models::Message;
use parley::{ClientConfig, SessionState, SyncController, SyncMode, SyncUpdate};

type Controller = SyncController<HttpDirectory>;

/// Command line arguments for Parley
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Parley: a command-line client for room-based chat.",
    long_about = "Parley is a line-oriented client for a room-based chat service.\n\n\
    Type /help at the prompt for the command list. Anything that is not a\n\
    command is sent to the active room."
)]
struct Args {
    /// Base URL of the REST directory service
    #[arg(long, default_value = "http://localhost:8000")]
    api_url: String,

    /// WebSocket endpoint of the live delivery server
    #[arg(long, default_value = "ws://localhost:8000/ws")]
    ws_url: String,

    /// Rooms and messages only: no friend/invite directory, no background
    /// notifications
    #[arg(long)]
    minimal: bool,

    /// Log file path
    #[arg(long, value_name = "PATH", default_value = "parley.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging goes to a file so it does not fight the prompt.
    let log_file = std::fs::File::create(&args.log_file)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    let mode = if args.minimal {
        SyncMode::Minimal
    } else {
        SyncMode::Full
    };
    let config = ClientConfig::new(&args.api_url, &args.ws_url, mode);
    let store = CredentialStore::open_default()?;
    let directory = HttpDirectory::new(&args.api_url);

    let (mut controller, mut events) = SyncController::new(config, store, directory);

    match controller.restore().await {
        Ok(true) => {
            let username = controller
                .session()
                .map(|s| s.username.clone())
                .unwrap_or_default();
            println!("Welcome back, {}.", username);
            print_status(&controller);
        }
        Ok(false) => println!("Not logged in. /login <user> <pass> or /signup <user> <pass>"),
        Err(e) => println!("Could not reach the directory service: {}", e),
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut prune = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&mut controller, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = events.recv() => {
                if let Some((scope, event)) = event {
                    if let Some(update) = controller.apply_channel_event(scope, event) {
                        render_update(&controller, update);
                    }
                }
            }
            _ = prune.tick() => {
                if controller.prune_typing() {
                    render_typing(&controller);
                }
            }
        }
    }

    controller.logout();
    println!("Bye.");
    Ok(())
}

/// Dispatch one input line. Returns false to quit.
async fn handle_line(controller: &mut Controller, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    if !line.starts_with('/') {
        if controller.state() == SessionState::RoomActive {
            controller.send_message(line);
        } else {
            println!("Join a room first (/join <room>).");
        }
        return true;
    }

    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let arg1 = parts.next();
    let arg2 = parts.next();

    match (command, arg1, arg2) {
        ("/quit", _, _) => return false,
        ("/help", _, _) => print_help(),

        ("/signup", Some(user), Some(pass)) => match controller.sign_up(user, pass).await {
            Ok(()) => {
                println!("Signed up and logged in as {}.", user);
                print_status(controller);
            }
            Err(e) => println!("Sign-up failed: {}", e),
        },
        ("/login", Some(user), Some(pass)) => match controller.login(user, pass).await {
            Ok(()) => {
                println!("Logged in as {}.", user);
                print_status(controller);
            }
            Err(e) => println!("Login failed: {}", e),
        },
        ("/logout", _, _) => {
            controller.logout();
            println!("Logged out.");
        }

        ("/rooms", _, _) => {
            for room in controller.rooms() {
                println!("  {}", room.name);
            }
        }
        ("/join", Some(room), _) => match controller.enter_room(room).await {
            Ok(()) => print_room(controller),
            Err(e) => println!("Could not enter {}: {}", room, e),
        },
        ("/leave", _, _) => match controller.leave_room().await {
            Ok(()) => println!("Back in the lobby."),
            Err(e) => println!("{}", e),
        },
        ("/create", Some(room), _) => match controller.create_room(room).await {
            Ok(created) => {
                println!("Created {}.", created.name);
                print_room(controller);
            }
            Err(e) => println!("Could not create room: {}", e),
        },
        ("/history", _, _) => print_room(controller),
        ("/who", _, _) => match controller.active_room() {
            Some(room) => {
                let users: Vec<&str> = room.presence().iter().map(String::as_str).collect();
                println!("In {}: {}", room.name, users.join(", "));
            }
            None => println!("Not in a room."),
        },
        ("/typing", _, _) => controller.notify_typing(),
        ("/done", _, _) => controller.notify_stopped_typing(),

        ("/search", Some(query), rest) => {
            let query = match rest {
                Some(rest) => format!("{} {}", query, rest),
                None => query.to_string(),
            };
            match controller.search(&query).await {
                Ok(results) if results.is_empty() => println!("No matches."),
                Ok(results) => {
                    for msg in &results {
                        println!("  [{}] {}", msg.room, format_message(msg));
                    }
                }
                Err(e) => println!("Search failed: {}", e),
            }
        }

        ("/friends", _, _) => {
            for friend in controller.friends() {
                println!("  {} (room {})", friend.username, friend.room_name);
            }
        }
        ("/befriend", Some(user), _) => match controller.send_friend_request(user).await {
            Ok(request) => println!("Friend request #{} sent.", request.id),
            Err(e) => println!("Could not send friend request: {}", e),
        },
        ("/unfriend", Some(user), _) => match controller.remove_friend(user).await {
            Ok(()) => println!("Removed {}.", user),
            Err(e) => println!("Could not remove friend: {}", e),
        },
        ("/requests", _, _) => {
            for request in controller.friend_requests() {
                println!("  #{} from {}", request.id, request.from_username);
            }
        }
        ("/faccept", Some(id), _) | ("/freject", Some(id), _) => {
            let accept = command == "/faccept";
            match id.parse::<i64>() {
                Ok(id) => match controller.respond_friend_request(id, accept).await {
                    Ok(()) => println!("Done."),
                    Err(e) => println!("Could not respond: {}", e),
                },
                Err(_) => println!("Usage: {} <id>", command),
            }
        }

        ("/invite", Some(room), Some(user)) => {
            match controller.send_room_invite(room, user).await {
                Ok(invite) => println!("Invite #{} sent to {}.", invite.id, user),
                Err(e) => println!("Could not invite: {}", e),
            }
        }
        ("/invites", _, _) => {
            for invite in controller.room_invites() {
                println!("  #{} to {}", invite.id, invite.room_name);
            }
        }
        ("/accept", Some(id), _) | ("/reject", Some(id), _) => {
            let accept = command == "/accept";
            match id.parse::<i64>() {
                Ok(id) => match controller.respond_room_invite(id, accept).await {
                    Ok(Some(room)) => {
                        println!("Joined {}.", room);
                        print_room(controller);
                    }
                    Ok(None) => println!("Invite declined."),
                    Err(e) => println!("Could not respond: {}", e),
                },
                Err(_) => println!("Usage: {} <id>", command),
            }
        }

        _ => println!("Unknown command. /help lists everything."),
    }
    true
}

fn render_update(controller: &Controller, update: SyncUpdate) {
    match update {
        SyncUpdate::MessageAppended(msg) => println!("{}", format_message(&msg)),
        SyncUpdate::Notification(msg) => println!("({}) {}: {}", msg.room, msg.username, msg.content),
        SyncUpdate::PresenceChanged => {
            if let Some(room) = controller.active_room() {
                let users: Vec<&str> = room.presence().iter().map(String::as_str).collect();
                println!("* now in {}: {}", room.name, users.join(", "));
            }
        }
        SyncUpdate::TypingChanged => render_typing(controller),
        SyncUpdate::ChannelClosed { reason } => {
            println!("* live feed lost ({}); /join again to reconnect", reason);
        }
    }
}

fn render_typing(controller: &Controller) {
    if let Some(room) = controller.active_room() {
        let names = room.typing_names();
        if names.is_empty() {
            debug!("typing indicator cleared");
        } else {
            println!("* typing: {}", names.join(", "));
        }
    }
}

fn format_message(msg: &Message) -> String {
    format!(
        "{} {}: {}",
        msg.timestamp.format("%H:%M"),
        msg.username,
        msg.content
    )
}

fn print_room(controller: &Controller) {
    if let Some(room) = controller.active_room() {
        println!("--- {} ---", room.name);
        for msg in room.messages() {
            println!("{}", format_message(msg));
        }
    }
}

fn print_status(controller: &Controller) {
    let rooms: Vec<&str> = controller.rooms().iter().map(|r| r.name.as_str()).collect();
    println!("Rooms: {}", rooms.join(", "));
    if !controller.friends().is_empty() {
        println!("Friends: {}", controller.friends().len());
    }
    if !controller.friend_requests().is_empty() {
        println!("Pending friend requests: {}", controller.friend_requests().len());
    }
    if !controller.room_invites().is_empty() {
        println!("Pending room invites: {}", controller.room_invites().len());
    }
}

fn print_help() {
    println!(
        "\
/signup <user> <pass>   create an identity and log in
/login <user> <pass>    log in
/logout                 log out and clear the stored session
/rooms                  list rooms
/join <room>            enter a room
/leave                  leave the active room
/create <room>          create a room and enter it
/history                reprint the active room
/who                    who is in the active room
/typing, /done          composition notices
/search <query>         full-text search over messages
/friends                list friends
/befriend <user>        send a friend request
/unfriend <user>        remove a friend
/requests               pending friend requests
/faccept, /freject <id> respond to a friend request
/invite <room> <user>   invite someone to a room
/invites                pending room invites
/accept, /reject <id>   respond to a room invite
/quit                   exit"
    );
}
