use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use slumini_chat::{
    import_local_conversation, Backend, ChatConfig, ChatMessage, ChatService, Participant, Role,
};
use slumini_store::{LocalChatStore, LocalPair, LocalStore, MessageStore};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Slumini - student and alumni messaging from the terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the message databases (default ~/.slumini)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Conversation backend: remote or local
    #[arg(short, long, global = true, default_value = "remote")]
    backend: Backend,

    /// Your user id
    #[arg(short, long, global = true, default_value = "")]
    id: String,

    /// Your display name
    #[arg(short, long, global = true, default_value = "anonymous")]
    name: String,

    /// Your role: student or alumni
    #[arg(short, long, global = true, default_value = "student")]
    role: Role,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message to the other participant
    Send {
        /// Recipient id
        to: String,
        /// Message text
        body: String,
        /// Recipient display name
        #[arg(long, default_value = "")]
        to_name: String,
    },
    /// Print a conversation, oldest first
    Messages { other: String },
    /// Follow a conversation until Ctrl+C
    Watch { other: String },
    /// List your conversations, most recent first
    Conversations,
    /// Mark a conversation as read
    MarkRead { other: String },
    /// Delete a local conversation
    Clear { other: String },
    /// Recompute conversation summaries from the message log
    Reconcile {
        /// Only this conversation id
        conversation: Option<String>,
    },
    /// Copy a local conversation into the primary store
    ImportLocal {
        /// Numeric alumni id used on the local path
        local_alumni: u64,
        /// Numeric student id used on the local path
        local_student: u64,
        #[arg(long)]
        student_id: String,
        #[arg(long, default_value = "")]
        student_name: String,
        #[arg(long)]
        alumni_id: String,
        #[arg(long, default_value = "")]
        alumni_name: String,
        /// Remove the local copy afterwards
        #[arg(long)]
        clear: bool,
    },
}

fn print_message(message: &ChatMessage) {
    println!(
        "[{}] {} ({}): {}",
        message.timestamp.format("%Y-%m-%d %H:%M:%S"),
        message.sender_name,
        message.sender_role,
        message.body
    );
}

fn display_name(name: String, id: &str) -> String {
    if name.is_empty() {
        id.to_string()
    } else {
        name
    }
}

async fn open_service(config: &ChatConfig, me: Participant) -> Result<ChatService> {
    if me.id.trim().is_empty() {
        bail!("--id is required for this command");
    }
    Ok(ChatService::open(config, me).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(ChatConfig::default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let mut config = ChatConfig::with_data_dir(data_dir);
    config.backend = args.backend;

    let me = Participant::new(args.id.clone(), args.name.clone(), args.role);

    match args.command {
        Command::Send { to, body, to_name } => {
            let service = open_service(&config, me).await?;
            let recipient = Participant::new(
                to.clone(),
                display_name(to_name, &to),
                args.role.counterpart(),
            );
            let id = service.send(&recipient, &body).await?;
            println!("Sent {}", id);
        }
        Command::Messages { other } => {
            let service = open_service(&config, me).await?;
            let messages = service.messages(&other).await?;
            if messages.is_empty() {
                println!("No messages yet");
            }
            for message in &messages {
                print_message(message);
            }
        }
        Command::Watch { other } => {
            let service = open_service(&config, me).await?;
            let mut subscription = service.subscribe(&other).await?;
            let mut shown = 0;

            println!("Watching conversation with {} (Ctrl+C to stop)", other);
            loop {
                tokio::select! {
                    snapshot = subscription.next_snapshot() => {
                        match snapshot {
                            Some(Ok(messages)) => {
                                // A cleared conversation starts over
                                if messages.len() < shown {
                                    shown = 0;
                                }
                                for message in &messages[shown..] {
                                    print_message(message);
                                }
                                shown = messages.len();
                            }
                            Some(Err(e)) => {
                                warn!("Subscription ended: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Stopping watch");
                        break;
                    }
                }
            }
            subscription.unsubscribe();
        }
        Command::Conversations => {
            let service = open_service(&config, me).await?;
            let conversations = service.conversations().await?;
            if conversations.is_empty() {
                println!("No conversations");
            }
            for conversation in conversations {
                let other = args.role.counterpart();
                println!(
                    "{}  {} ({})  unread {}  [{}] {}",
                    conversation.id,
                    conversation.participants.name_of(other),
                    conversation.participants.id_of(other),
                    conversation.unread_count.get(args.role),
                    conversation.updated_at.format("%Y-%m-%d %H:%M"),
                    conversation.last_message
                );
            }
        }
        Command::MarkRead { other } => {
            let service = open_service(&config, me).await?;
            service.mark_read(&other).await?;
            println!("Marked conversation with {} as read", other);
        }
        Command::Clear { other } => {
            let service = open_service(&config, me).await?;
            service.clear(&other).await?;
            println!("Cleared conversation with {}", other);
        }
        Command::Reconcile { conversation } => {
            let store = MessageStore::with_config(config.store.clone()).await?;
            match conversation {
                Some(id) => match store.conversations().rebuild_summary(&id).await? {
                    Some(summary) => println!(
                        "{}: student unread {}, alumni unread {}",
                        summary.id, summary.unread_count.student, summary.unread_count.alumni
                    ),
                    None => println!("{} has no messages", id),
                },
                None => {
                    let rebuilt = store.conversations().rebuild_all().await?;
                    println!("Rebuilt {} conversation summaries", rebuilt);
                }
            }
        }
        Command::ImportLocal {
            local_alumni,
            local_student,
            student_id,
            student_name,
            alumni_id,
            alumni_name,
            clear,
        } => {
            let local = LocalChatStore::new(LocalStore::open(config.store.local_db_path.clone()).await?);
            let remote = MessageStore::with_config(config.store.clone()).await?;

            let student = Participant::student(student_id.clone(), display_name(student_name, &student_id));
            let alumni = Participant::alumni(alumni_id.clone(), display_name(alumni_name, &alumni_id));

            let imported = import_local_conversation(
                &local,
                &remote,
                LocalPair::new(local_alumni, local_student),
                &student,
                &alumni,
                clear,
            )
            .await?;
            println!("Imported {} messages", imported);
        }
    }

    Ok(())
}
