//! Pages (clients) the worker can see and control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::ServiceWorkerError;

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether this worker controls the page.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl Client {
    /// An unfocused window at `url`, not yet controlled.
    pub fn window(url: Url) -> Self {
        Self {
            id: format!("client-{}", uuid_simple()),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }

    fn in_scope(&self, scope: &Url) -> bool {
        self.url.as_str().starts_with(scope.as_str())
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Match all clients, ordered by ID.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Give focus to a window client; every other client loses it.
    pub fn focus(&mut self, id: &str) -> Result<&Client, ServiceWorkerError> {
        match self.clients.get(id) {
            None => return Err(ServiceWorkerError::NotFound(format!("client {}", id))),
            Some(c) if c.client_type != ClientType::Window => {
                return Err(ServiceWorkerError::StateError(
                    "Can only focus window clients".to_string(),
                ));
            }
            Some(_) => {}
        }

        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        self.clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {}", id)))
    }

    /// Open a focused window at `url`, controlled by this worker.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.controlled = true;
        for other in self.clients.values_mut() {
            other.focused = false;
        }
        client.focused = true;
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Take control of every client under `scope`. Returns how many changed.
    pub fn claim(&mut self, scope: &Url) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.in_scope(scope) && !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// First window under `scope` whose URL is exactly `url`.
    pub fn find_window(&self, scope: &Url, url: &Url) -> Option<&Client> {
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        self.match_all(&options)
            .into_iter()
            .find(|c| c.in_scope(scope) && c.url == *url)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
