use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// How many servers the nearest/farthest listings show.
pub const LISTING_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: u32,
    pub url: String,
    pub lat: f64,
    pub lon: f64,
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub cc: String,
    #[serde(default)]
    pub sponsor: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientLocation {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerList {
    #[serde(default)]
    pub client: Option<ClientLocation>,
    pub servers: Vec<Server>,
}

impl ServerList {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Reading server list {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Parsing server list {}", path.display()))
    }

    /// Attach the distance from `from` to every server.
    pub fn ranked(&self, from: ClientLocation) -> Vec<RankedServer> {
        self.servers
            .iter()
            .map(|server| RankedServer {
                distance_km: distance_km(from, server.lat, server.lon),
                server: server.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedServer {
    #[serde(flatten)]
    pub server: Server,
    pub distance_km: f64,
}

/// Great-circle distance on a spherical Earth, coordinates in degrees.
pub fn distance_km(from: ClientLocation, lat: f64, lon: f64) -> f64 {
    let (lat1, lon1) = (from.lat.to_radians(), from.lon.to_radians());
    let (lat2, lon2) = (lat.to_radians(), lon.to_radians());
    let cos = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * (lon2 - lon1).cos();
    // Rounding can push identical points just past 1
    EARTH_RADIUS_KM * cos.clamp(-1.0, 1.0).acos()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Id,
    Distance,
}

pub fn sort_servers(servers: &mut [RankedServer], key: SortKey) {
    match key {
        SortKey::Id => servers.sort_by_key(|s| s.server.id),
        SortKey::Distance => servers.sort_by(|a, b| {
            a.distance_km.partial_cmp(&b.distance_km).unwrap_or(Ordering::Equal)
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSelector {
    Nearest,
    Farthest,
    Id(u32),
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("No servers available. Check the server list file.")]
    NoServers,
    #[error("Server {0} not found. Run 'servers' to list available ids.")]
    NotFound(u32),
}

// Pure decision function for easier testing
pub fn select_server(
    mut servers: Vec<RankedServer>,
    selector: ServerSelector,
) -> Result<RankedServer, SelectError> {
    if servers.is_empty() {
        return Err(SelectError::NoServers);
    }
    match selector {
        ServerSelector::Id(id) => servers
            .into_iter()
            .find(|s| s.server.id == id)
            .ok_or(SelectError::NotFound(id)),
        ServerSelector::Nearest => {
            sort_servers(&mut servers, SortKey::Distance);
            Ok(servers.swap_remove(0))
        }
        ServerSelector::Farthest => {
            sort_servers(&mut servers, SortKey::Distance);
            servers.pop().ok_or(SelectError::NoServers)
        }
    }
}
