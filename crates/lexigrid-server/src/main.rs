//! Lexigrid session server
//!
//! Runs one session: accepts renet clients, feeds their messages to the coordinator
//! and routes its replies.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lexigrid_protocol::wire::{deserialize_client_message, serialize_server_message};
use lexigrid_protocol::{ClientMessage, ServerMessage};
use renet::{ConnectionConfig, RenetServer, ServerEvent};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use lexigrid_server::{
    channel_id, create_channel_configs, server_channel, Coordinator, Outgoing, Roster,
    ServerConfig, ServerRunner, TransportConfig, WordList, PROTOCOL_ID,
};

/// ~60 Hz
const TICK: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "lexigrid-server")]
#[command(about = "Authoritative Lexigrid session server", version)]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Word list, one word per line (overrides the config)
    #[arg(short, long)]
    dictionary: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

struct Server {
    renet: RenetServer,
    roster: Roster,
    coordinator: Coordinator<WordList>,
}

impl Server {
    fn new(config: &ServerConfig, words: WordList) -> Self {
        let connection_config = ConnectionConfig {
            available_bytes_per_tick: 60_000,
            server_channels_config: create_channel_configs(),
            client_channels_config: create_channel_configs(),
        };

        Self {
            renet: RenetServer::new(connection_config),
            roster: Roster::new(config.rate_limit_messages, config.rate_limit_window()),
            coordinator: Coordinator::new(config, words),
        }
    }

    fn update(&mut self) {
        while let Some(event) = self.renet.get_event() {
            self.handle_server_event(event);
        }

        for client_id in self.renet.clients_id() {
            for channel in [channel_id::SESSION, channel_id::HEARTBEAT] {
                while let Some(message) = self.renet.receive_message(client_id, channel) {
                    self.handle_client_message(client_id, &message);
                }
            }
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ClientConnected { client_id } => {
                info!("Client {:?} connected", client_id);
                self.roster.connect(client_id);
            }
            ServerEvent::ClientDisconnected { client_id, reason } => {
                info!("Client {:?} disconnected: {:?}", client_id, reason);
                if let Some(participant) = self.roster.disconnect(client_id) {
                    let out = self.coordinator.leave(participant);
                    self.dispatch(out);
                }
            }
        }
    }

    fn handle_client_message(&mut self, client_id: u64, data: &[u8]) {
        if !self.roster.check_rate_limit(client_id) {
            warn!("Rate limit exceeded for client {:?}", client_id);
            return;
        }

        let message = match deserialize_client_message(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to deserialize message from {:?}: {}", client_id, e);
                return;
            }
        };

        match (self.roster.participant(client_id), message) {
            (Some(participant), message) => {
                let out = self.coordinator.handle(participant, message);
                self.dispatch(out);
            }
            (None, ClientMessage::Join { name }) => self.handle_join(client_id, name),
            (None, message) => {
                warn!(
                    "Client {:?} sent {} before joining",
                    client_id,
                    message.label()
                );
            }
        }
    }

    fn handle_join(&mut self, client_id: u64, name: String) {
        match self.coordinator.join(name) {
            Ok((participant, out)) => {
                self.roster.bind(client_id, participant);
                self.dispatch(out);
            }
            Err(e) => {
                warn!("Join from {:?} rejected: {}", client_id, e);
                self.send_message(client_id, &ServerMessage::JoinRejected { reason: e.reason() });
            }
        }
    }

    fn dispatch(&mut self, out: Vec<Outgoing>) {
        for Outgoing { recipient, message } in out {
            for participant in self.coordinator.resolve(recipient) {
                match self.roster.client(participant) {
                    Some(client_id) => self.send_message(client_id, &message),
                    None => warn!("No connection for {}", participant),
                }
            }
        }
    }

    fn send_message(&mut self, client_id: u64, message: &ServerMessage) {
        match serialize_server_message(message) {
            Ok(data) => self
                .renet
                .send_message(client_id, server_channel(message), data),
            Err(e) => warn!("Failed to serialize {}: {}", message.label(), e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("lexigrid_server=debug")
    } else {
        EnvFilter::new("lexigrid_server=info")
    };
    fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(dictionary) = args.dictionary {
        config.dictionary = Some(dictionary);
    }

    let words = match &config.dictionary {
        Some(path) => WordList::load(path)
            .with_context(|| format!("loading dictionary {}", path.display()))?,
        None => {
            warn!("No dictionary configured; every submission will be rejected");
            WordList::default()
        }
    };

    let mut transport = ServerRunner::new(TransportConfig {
        public_address: config.bind_address,
        max_clients: usize::from(config.max_players),
        private_key: None, // Unsecure mode for development
    })?;
    let mut server = Server::new(&config, words);

    info!("Lexigrid Server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Listening on {}",
        transport.local_addr().unwrap_or(config.bind_address)
    );
    info!("Protocol ID: {:016x}", PROTOCOL_ID);

    let mut ticker = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                transport.receive(&mut server.renet, TICK);
                server.update();
                transport.send(&mut server.renet);
            }
        }
    }

    Ok(())
}
