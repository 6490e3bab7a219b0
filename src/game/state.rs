//! World State Definitions
//!
//! Entity types and the per-session world container.
//! Uses BTreeMap so snapshots serialize in a stable key order.
//!
//! `WorldState` has no locking of its own. Every method here must be called
//! while holding the owning session's guard (see `network::session`).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;

use crate::core::id::fresh_id;

/// Player identifier (short alphanumeric token).
pub type PlayerId = String;

/// Session identifier (short alphanumeric token).
pub type SessionId = String;

/// Identifier for bullets, xp items and xp areas.
pub type EntityId = String;

// =============================================================================
// WORLD CONFIG
// =============================================================================

/// Constants used to seed a world and spawn entities in it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    /// World width in units.
    pub width: f64,
    /// World height in units.
    pub height: f64,
    /// Xp items placed when the world is created.
    pub xp_item_count: usize,
    /// Xp areas placed when the world is created.
    pub xp_area_count: usize,
    /// Smallest xp item value (inclusive).
    pub xp_value_min: u32,
    /// Largest xp item value (inclusive).
    pub xp_value_max: u32,
    /// Xp area width.
    pub area_width: f64,
    /// Xp area height.
    pub area_height: f64,
    /// Xp granted per second inside an area.
    pub area_xp_per_second: f64,
    /// Seconds an area can be occupied.
    pub area_max_time: f64,
    /// Radius in which an area reacts to players.
    pub area_action_radius: f64,
    /// Starting (and maximum) hit points.
    pub player_hp: f64,
    /// Xp needed to reach level 1.
    pub player_xp_to_next: f64,
    /// Length of generated player identifiers.
    pub player_id_len: usize,
    /// Length of generated bullet/xp identifiers.
    pub entity_id_len: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 2000.0,
            height: 2000.0,
            xp_item_count: 20,
            xp_area_count: 3,
            xp_value_min: 20,
            xp_value_max: 80,
            area_width: 60.0,
            area_height: 60.0,
            area_xp_per_second: 5.0,
            area_max_time: 5.0,
            area_action_radius: 90.0,
            player_hp: 100.0,
            player_xp_to_next: 100.0,
            player_id_len: 8,
            entity_id_len: 6,
        }
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// A connected participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Player identifier.
    pub id: PlayerId,
    /// Owning session.
    pub session: SessionId,
    /// Position X.
    pub x: f64,
    /// Position Y.
    pub y: f64,
    /// Facing angle (radians, as reported by the client).
    pub angle: f64,
    /// Current hit points.
    pub hp: f64,
    /// Maximum hit points.
    pub max_hp: f64,
    /// Current level.
    pub level: u32,
    /// Accumulated experience.
    pub xp: f64,
    /// Experience required for the next level.
    #[serde(rename = "xpToNextLevel")]
    pub xp_to_next: f64,
}

/// A projectile spawned by a shoot action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bullet {
    /// Bullet identifier.
    pub id: EntityId,
    /// Owning session.
    pub session: SessionId,
    /// Position X at spawn.
    pub x: f64,
    /// Position Y at spawn.
    pub y: f64,
    /// Velocity X.
    pub vx: f64,
    /// Velocity Y.
    pub vy: f64,
    /// Distance travelled. Not advanced server-side.
    pub dist: f64,
    /// Shooter.
    pub owner: PlayerId,
    /// When the bullet was created.
    #[serde(skip)]
    pub spawned_at: Instant,
}

/// A collectible experience orb.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct XpItem {
    /// Item identifier.
    pub id: EntityId,
    /// Position X.
    pub x: f64,
    /// Position Y.
    pub y: f64,
    /// Experience granted on pickup.
    pub value: u32,
}

/// A capture zone.
///
/// `active`, `time_in_area` and `action_radius` are carried in snapshots but
/// nothing on the server transitions them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XpArea {
    /// Area identifier.
    pub id: EntityId,
    /// Position X.
    pub x: f64,
    /// Position Y.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
    /// Xp rate while occupied.
    pub xp_per_second: f64,
    /// Whether a player is capturing.
    pub active: bool,
    /// Seconds spent in the area so far.
    pub time_in_area: f64,
    /// Capture duration cap.
    pub max_time: f64,
    /// Reaction radius.
    pub action_radius: f64,
}

// =============================================================================
// WORLD STATE
// =============================================================================

/// All authoritative state of one match.
///
/// Serializes to the `session` payload of a `sessionState` message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    /// Session identifier.
    pub id: SessionId,
    /// Connected players keyed by id.
    pub players: BTreeMap<PlayerId, PlayerState>,
    /// Live bullets keyed by id.
    pub bullets: BTreeMap<EntityId, Bullet>,
    /// Xp items keyed by id.
    pub xp_items: BTreeMap<EntityId, XpItem>,
    /// Xp areas keyed by id.
    pub xp_areas: BTreeMap<EntityId, XpArea>,
    /// World width.
    pub world_width: f64,
    /// World height.
    pub world_height: f64,
    #[serde(skip)]
    config: WorldConfig,
    /// Set while the player collection is empty.
    #[serde(skip)]
    empty_since: Option<Instant>,
    #[serde(skip)]
    retired: bool,
}

impl WorldState {
    /// Create an empty world with no entities.
    pub fn new(id: SessionId, config: WorldConfig) -> Self {
        Self {
            id,
            players: BTreeMap::new(),
            bullets: BTreeMap::new(),
            xp_items: BTreeMap::new(),
            xp_areas: BTreeMap::new(),
            world_width: config.width,
            world_height: config.height,
            config,
            empty_since: Some(Instant::now()),
            retired: false,
        }
    }

    /// Create a world pre-populated with xp items and xp areas at random
    /// positions.
    pub fn seeded<R: Rng + ?Sized>(id: SessionId, config: WorldConfig, rng: &mut R) -> Self {
        let mut world = Self::new(id, config);

        for _ in 0..world.config.xp_item_count {
            world.spawn_xp_item(rng, None);
        }

        for _ in 0..world.config.xp_area_count {
            let id = fresh_id(rng, world.config.entity_id_len, |c| world.xp_areas.contains_key(c));
            let (x, y) = world.random_position(rng);
            let area = XpArea {
                id: id.clone(),
                x,
                y,
                width: world.config.area_width,
                height: world.config.area_height,
                xp_per_second: world.config.area_xp_per_second,
                active: false,
                time_in_area: 0.0,
                max_time: world.config.area_max_time,
                action_radius: world.config.area_action_radius,
            };
            world.xp_areas.insert(id, area);
        }

        world
    }

    /// World constants this state was created with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Random point inside the world bounds.
    fn random_position<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
        (
            rng.gen::<f64>() * self.world_width,
            rng.gen::<f64>() * self.world_height,
        )
    }

    /// Insert an xp item with a random position and value. Its id is never
    /// `exclude`, even if that id is not currently in use.
    fn spawn_xp_item<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        exclude: Option<&str>,
    ) -> EntityId {
        let id = fresh_id(rng, self.config.entity_id_len, |c| {
            self.xp_items.contains_key(c) || exclude == Some(c)
        });
        let (x, y) = self.random_position(rng);
        let value = rng.gen_range(self.config.xp_value_min..=self.config.xp_value_max);
        self.xp_items.insert(id.clone(), XpItem { id: id.clone(), x, y, value });
        id
    }

    // =========================================================================
    // Players
    // =========================================================================

    /// Create a player with a fresh id, default stats and a random spawn
    /// point, and insert it.
    pub fn spawn_player<R: Rng + ?Sized>(&mut self, rng: &mut R) -> PlayerId {
        let id = fresh_id(rng, self.config.player_id_len, |c| self.players.contains_key(c));
        let (x, y) = self.random_position(rng);
        self.add_player(PlayerState {
            id: id.clone(),
            session: self.id.clone(),
            x,
            y,
            angle: 0.0,
            hp: self.config.player_hp,
            max_hp: self.config.player_hp,
            level: 0,
            xp: 0.0,
            xp_to_next: self.config.player_xp_to_next,
        });
        id
    }

    /// Insert a player, replacing any player with the same id.
    pub fn add_player(&mut self, player: PlayerState) {
        self.players.insert(player.id.clone(), player);
        self.empty_since = None;
    }

    /// Remove a player.
    pub fn remove_player(&mut self, id: &str) -> Option<PlayerState> {
        let removed = self.players.remove(id);
        if self.players.is_empty() && self.empty_since.is_none() {
            self.empty_since = Some(Instant::now());
        }
        removed
    }

    /// Overwrite a player's position and angle.
    ///
    /// Returns false (and changes nothing) if the player is gone.
    pub fn apply_move(&mut self, id: &str, x: f64, y: f64, angle: f64) -> bool {
        match self.players.get_mut(id) {
            Some(player) => {
                player.x = x;
                player.y = y;
                player.angle = angle;
                true
            }
            None => false,
        }
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    // =========================================================================
    // Bullets
    // =========================================================================

    /// Insert a new bullet with zero travel distance.
    pub fn spawn_bullet<R: Rng + ?Sized>(
        &mut self,
        owner: &str,
        x: f64,
        y: f64,
        vx: f64,
        vy: f64,
        rng: &mut R,
    ) -> EntityId {
        let id = fresh_id(rng, self.config.entity_id_len, |c| self.bullets.contains_key(c));
        self.bullets.insert(id.clone(), Bullet {
            id: id.clone(),
            session: self.id.clone(),
            x,
            y,
            vx,
            vy,
            dist: 0.0,
            owner: owner.to_string(),
            spawned_at: Instant::now(),
        });
        id
    }

    /// Drop bullets older than `ttl`. Returns how many were removed.
    pub fn expire_bullets(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.bullets.len();
        self.bullets
            .retain(|_, b| now.saturating_duration_since(b.spawned_at) < ttl);
        before - self.bullets.len()
    }

    // =========================================================================
    // Xp items
    // =========================================================================

    /// Remove the named xp item and spawn a replacement under a new id.
    ///
    /// The replacement is spawned even if `id` did not exist, so the item
    /// count only ever grows here. Returns the new item's id.
    pub fn collect_orb<R: Rng + ?Sized>(&mut self, id: &str, rng: &mut R) -> EntityId {
        let replacement = self.spawn_xp_item(rng, Some(id));
        self.xp_items.remove(id);
        replacement
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// How long the world has had no players, if it has none.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.empty_since
            .map(|since| now.saturating_duration_since(since))
    }

    /// Mark the world as removed from the session registry.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    /// Whether the world was removed from the session registry.
    pub fn is_retired(&self) -> bool {
        self.retired
    }
}
