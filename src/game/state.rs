//! Authoritative match state: players, bodies, projectiles and round flow

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SimConfig;
use crate::netcode::{Action, InputCommand};
use crate::util::time::secs_to_ticks;

use super::combat::{
    mitigate, FireBlocked, Inventory, WeaponKind, MAX_ARMOR, MAX_HEALTH, PENETRATION_DAMAGE_FACTOR,
};
use super::economy::{EconomyRules, LossStreaks};
use super::events::{EventQueue, MatchEvent};
use super::grenade::{Grenade, BLAST_FORCE, FUSE_SECS};
use super::map::{GameMap, MapData, MapError};
use super::math::Vec2;
use super::physics::{BodyId, Collider, PhysicsWorld, RigidBody};
use super::projectile::{Projectile, ProjectileId, ProjectilePool};
use super::round::{ClockEvent, RoundClock, RoundEndReason, RoundPhase, Score, TeamCounts};
use super::shop::{BuyError, ShopItem};
use super::{PlayerId, Stance, Team, PLAYER_RADIUS};

/// A hit whose ray passes this close to the centre (as a fraction of the radius) is a headshot
const HEADSHOT_ZONE: f32 = 0.2;
const MAX_CHAT_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerStats {
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage_dealt: f32,
    pub headshots: u32,
    pub shots_fired: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Connected,
    Disconnected { since_tick: u64 },
}

/// Authoritative per-player state
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub team: Team,
    pub body: BodyId,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Facing in radians
    pub aim: f32,
    pub health: f32,
    pub armor: f32,
    pub money: u32,
    pub alive: bool,
    pub stance: Stance,
    pub inventory: Inventory,
    pub last_sequence: u64,
    pub connection: Connection,
    pub stats: PlayerStats,
    pending_move: Vec2,
    /// (attacker, tick) of recent damage, for assists
    recent_attackers: Vec<(PlayerId, u64)>,
}

impl Player {
    pub fn is_connected(&self) -> bool {
        self.connection == Connection::Connected
    }
}

/// Result of applying one accepted command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Applied,
    /// Valid command with no effect in the current state
    Ignored(&'static str),
    /// Chat text to relay to the room
    Chat(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("room is full ({0} players)")]
    RoomFull(usize),

    #[error("player {0} is already in this room")]
    DuplicatePlayer(PlayerId),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("match has already started")]
    AlreadyStarted,

    #[error("cannot start a match without players")]
    NotEnoughPlayers,

    #[error("state invariant violated: {0}")]
    InvariantViolated(String),

    #[error(transparent)]
    Map(#[from] MapError),
}

/// What happened during [`MatchState::advance`] besides queued events
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub excluded_bodies: Vec<BodyId>,
    pub clock: Vec<ClockEvent>,
    pub reclaimed: Vec<PlayerId>,
}

/// The single authoritative state of one room
pub struct MatchState {
    id: Uuid,
    tick: u64,
    tick_rate: u32,
    max_players: usize,
    grace_ticks: u64,
    assist_ticks: u64,
    economy: EconomyRules,
    map: GameMap,
    physics: PhysicsWorld,
    players: BTreeMap<PlayerId, Player>,
    body_owners: BTreeMap<BodyId, PlayerId>,
    object_bodies: BTreeMap<BodyId, String>,
    projectiles: ProjectilePool,
    /// Tick each projectile was fired on; its first sweep happens at fire time
    projectile_spawned: BTreeMap<ProjectileId, u64>,
    grenades: Vec<Grenade>,
    clock: RoundClock,
    streaks: LossStreaks,
    events: EventQueue,
    rng: ChaCha8Rng,
}

impl MatchState {
    pub fn new(id: Uuid, seed: u64, config: &SimConfig, map_data: MapData) -> Result<Self, MatchError> {
        let map = GameMap::load(map_data)?;
        let mut physics = PhysicsWorld::new(config.physics);
        let object_bodies = cover_bodies(&mut physics, &map);

        Ok(Self {
            id,
            tick: 0,
            tick_rate: config.tick_rate,
            max_players: config.max_players_per_room,
            grace_ticks: secs_to_ticks(config.reconnect_grace_secs, config.tick_rate),
            assist_ticks: secs_to_ticks(config.rules.assist_window_secs, config.tick_rate),
            economy: config.economy,
            map,
            physics,
            players: BTreeMap::new(),
            body_owners: BTreeMap::new(),
            object_bodies,
            projectiles: ProjectilePool::new(),
            projectile_spawned: BTreeMap::new(),
            grenades: Vec::new(),
            clock: RoundClock::new(config.rules, config.tick_rate),
            streaks: LossStreaks::default(),
            events: EventQueue::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn phase(&self) -> RoundPhase {
        self.clock.phase()
    }

    pub fn clock(&self) -> &RoundClock {
        &self.clock
    }

    pub fn score(&self) -> Score {
        self.clock.score()
    }

    pub fn map(&self) -> &GameMap {
        &self.map
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn connected_count(&self) -> usize {
        self.players.values().filter(|p| p.is_connected()).count()
    }

    pub fn projectiles(&self) -> &ProjectilePool {
        &self.projectiles
    }

    pub fn grenades(&self) -> &[Grenade] {
        &self.grenades
    }

    pub fn drain_events(&mut self) -> Vec<MatchEvent> {
        self.events.drain()
    }

    fn team_size(&self, team: Team) -> usize {
        self.players.values().filter(|p| p.team == team).count()
    }

    fn team_counts(&self) -> TeamCounts {
        let mut counts = TeamCounts::default();
        for player in self.players.values() {
            match player.team {
                Team::Ct => {
                    counts.ct_total += 1;
                    counts.ct_alive += player.alive as usize;
                }
                Team::T => {
                    counts.t_total += 1;
                    counts.t_alive += player.alive as usize;
                }
            }
        }
        counts
    }

    /// Spawn points for `team` in a seeded shuffled order
    fn shuffled_spawns(&mut self, team: Team) -> Vec<Vec2> {
        let mut spawns: Vec<Vec2> = self.map.spawn_points(team).map(|s| s.position).collect();
        spawns.shuffle(&mut self.rng);
        spawns
    }

    /// Add a participant. Without a team preference the smaller team is chosen.
    pub fn add_player(
        &mut self,
        id: PlayerId,
        name: String,
        team: Option<Team>,
        weapon: Option<WeaponKind>,
    ) -> Result<&Player, MatchError> {
        if self.players.contains_key(&id) {
            return Err(MatchError::DuplicatePlayer(id));
        }
        if self.players.len() >= self.max_players {
            return Err(MatchError::RoomFull(self.max_players));
        }

        let team = team.unwrap_or_else(|| {
            if self.team_size(Team::T) < self.team_size(Team::Ct) {
                Team::T
            } else {
                Team::Ct
            }
        });
        let slot = self.team_size(team);
        let spawns = self.shuffled_spawns(team);
        let position = spawns[slot % spawns.len()];

        // late joiners sit out until the next round
        let alive = self.phase() == RoundPhase::Warmup;
        let mut body = RigidBody::dynamic(Collider::Circle { radius: PLAYER_RADIUS }, position, 1.0);
        body.enabled = alive;
        let body = self.physics.add_body(body);
        self.body_owners.insert(body, id);

        let mut inventory = Inventory::new(WeaponKind::default_pistol(team));
        if let Some(kind) = weapon {
            inventory.give(kind);
        }

        let player = Player {
            id,
            name: name.clone(),
            team,
            body,
            position,
            velocity: Vec2::ZERO,
            aim: 0.0,
            health: MAX_HEALTH,
            armor: self.clock.rules().spawn_armor.clamp(0.0, MAX_ARMOR),
            money: self.economy.start_money,
            alive,
            stance: Stance::default(),
            inventory,
            last_sequence: 0,
            connection: Connection::Connected,
            stats: PlayerStats::default(),
            pending_move: Vec2::ZERO,
            recent_attackers: Vec::new(),
        };

        info!(room_id = %self.id, player_id = %id, ?team, "Player added to match");
        self.events.push(MatchEvent::PlayerJoined { player_id: id, name, team });
        Ok(self.players.entry(id).or_insert(player))
    }

    /// Drop a player and reclaim its body
    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&id)?;
        self.physics.remove_body(player.body);
        self.body_owners.remove(&player.body);
        if self.clock.cancel_defuse(id) {
            self.events.push(MatchEvent::DefuseCancelled { player_id: id });
        }
        self.events.push(MatchEvent::PlayerLeft { player_id: id });
        info!(room_id = %self.id, player_id = %id, "Player removed from match");
        Some(player)
    }

    /// Keep the player in the world but stop draining its input
    pub fn mark_disconnected(&mut self, id: PlayerId) -> bool {
        let tick = self.tick;
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };
        if !player.is_connected() {
            return false;
        }
        player.connection = Connection::Disconnected { since_tick: tick };
        player.pending_move = Vec2::ZERO;
        if self.clock.cancel_defuse(id) {
            self.events.push(MatchEvent::DefuseCancelled { player_id: id });
        }
        self.events.push(MatchEvent::PlayerDisconnected { player_id: id });
        true
    }

    /// Reattach a player; returns its last accepted sequence
    pub fn reconnect(&mut self, id: PlayerId) -> Result<u64, MatchError> {
        let player = self.players.get_mut(&id).ok_or(MatchError::UnknownPlayer(id))?;
        if !player.is_connected() {
            player.connection = Connection::Connected;
            self.events.push(MatchEvent::PlayerReconnected { player_id: id });
        }
        Ok(player.last_sequence)
    }

    /// Record a processed sequence without applying it (e.g. a command the
    /// anti-cheat gate discarded)
    pub fn acknowledge(&mut self, id: PlayerId, sequence: u64) {
        if let Some(player) = self.players.get_mut(&id) {
            player.last_sequence = player.last_sequence.max(sequence);
        }
    }

    /// Leave warmup and begin round one
    pub fn start_match(&mut self) -> Result<(), MatchError> {
        if self.phase() != RoundPhase::Warmup {
            return Err(MatchError::AlreadyStarted);
        }
        if self.players.is_empty() {
            return Err(MatchError::NotEnoughPlayers);
        }

        self.streaks.reset();
        let start_money = self.economy.start_money;
        for player in self.players.values_mut() {
            player.money = start_money;
            player.stats = PlayerStats::default();
        }
        self.clock.start(self.tick);
        self.reset_round();
        info!(room_id = %self.id, players = self.players.len(), "Match started");
        Ok(())
    }

    /// Swap the map during warmup. The replacement is validated before anything
    /// changes; cover bodies are rebuilt and every player respawns on it.
    pub fn load_map(&mut self, data: MapData) -> Result<(), MatchError> {
        if self.phase() != RoundPhase::Warmup {
            return Err(MatchError::AlreadyStarted);
        }
        self.map.replace(data)?;

        for body in std::mem::take(&mut self.object_bodies).into_keys() {
            self.physics.remove_body(body);
        }
        self.object_bodies = cover_bodies(&mut self.physics, &self.map);
        self.reset_round();

        let name = self.map.name().to_string();
        info!(room_id = %self.id, map = %name, "Map loaded");
        self.events.push(MatchEvent::MapLoaded { name });
        Ok(())
    }

    /// Respawn everyone at team spawns with full health and refilled weapons
    fn reset_round(&mut self) {
        self.projectiles.clear();
        self.projectile_spawned.clear();
        self.grenades.clear();
        let spawn_armor = self.clock.rules().spawn_armor;

        for team in [Team::Ct, Team::T] {
            let spawns = self.shuffled_spawns(team);
            let ids: Vec<PlayerId> = self
                .players
                .values()
                .filter(|p| p.team == team)
                .map(|p| p.id)
                .collect();

            for (slot, id) in ids.into_iter().enumerate() {
                let Some(player) = self.players.get_mut(&id) else {
                    continue;
                };
                let position = spawns[slot % spawns.len()];
                player.alive = true;
                player.health = MAX_HEALTH;
                player.armor = player.armor.max(spawn_armor).clamp(0.0, MAX_ARMOR);
                player.inventory.refill();
                player.position = position;
                player.velocity = Vec2::ZERO;
                player.pending_move = Vec2::ZERO;
                player.recent_attackers.clear();

                if let Some(body) = self.physics.body_mut(player.body) {
                    body.position = position;
                    body.velocity = Vec2::ZERO;
                    body.enabled = true;
                }
            }
        }
    }

    /// Apply one accepted, validated command
    pub fn apply_command(&mut self, command: &InputCommand) -> Result<CommandOutcome, MatchError> {
        let id = command.player_id;
        let player = self
            .players
            .get_mut(&id)
            .ok_or(MatchError::UnknownPlayer(id))?;
        player.last_sequence = command.sequence;

        match &command.action {
            Action::Move { delta, stance, aim } => {
                if !player.alive {
                    return Ok(CommandOutcome::Ignored("dead players cannot move"));
                }
                if !delta.is_finite() || !aim.is_finite() {
                    return Ok(CommandOutcome::Ignored("non-finite movement"));
                }
                player.stance = *stance;
                player.aim = *aim;
                player.pending_move += *delta;
                Ok(CommandOutcome::Applied)
            }
            Action::Shoot { aim } => {
                if !player.alive {
                    return Ok(CommandOutcome::Ignored("dead players cannot shoot"));
                }
                if !aim.is_finite() {
                    return Ok(CommandOutcome::Ignored("non-finite aim"));
                }
                if !self.clock.combat_allowed() {
                    return Ok(CommandOutcome::Ignored("shooting is disabled in this phase"));
                }
                if let Err(blocked) = player.inventory.active_mut().try_fire(self.tick, self.tick_rate) {
                    return Ok(CommandOutcome::Ignored(match blocked {
                        FireBlocked::Cycling => "weapon is still cycling",
                        FireBlocked::Reloading => "weapon is reloading",
                        FireBlocked::Empty => "magazine is empty",
                    }));
                }
                player.aim = *aim;
                self.fire(id, *aim);
                Ok(CommandOutcome::Applied)
            }
            Action::Reload => {
                if player.inventory.active_mut().start_reload(self.tick, self.tick_rate) {
                    Ok(CommandOutcome::Applied)
                } else {
                    Ok(CommandOutcome::Ignored("nothing to reload"))
                }
            }
            Action::Switch { slot } => {
                if !player.alive {
                    return Ok(CommandOutcome::Ignored("dead players cannot switch weapons"));
                }
                if player.inventory.switch(*slot) {
                    Ok(CommandOutcome::Applied)
                } else {
                    Ok(CommandOutcome::Ignored("nothing to switch to"))
                }
            }
            Action::Buy { item } => match self.buy(id, *item) {
                Ok(_) => Ok(CommandOutcome::Applied),
                Err(_) => Ok(CommandOutcome::Ignored("purchase refused")),
            },
            Action::Use => Ok(self.use_objective(id)),
            Action::Chat { text } => {
                let text: String = text.trim().chars().take(MAX_CHAT_LEN).collect();
                if text.is_empty() {
                    return Ok(CommandOutcome::Ignored("empty chat message"));
                }
                self.events.push(MatchEvent::Chat {
                    player_id: id,
                    text: text.clone(),
                });
                Ok(CommandOutcome::Chat(text))
            }
        }
    }

    /// Buy `item` for `id`, returning the price paid
    pub fn buy(&mut self, id: PlayerId, item: ShopItem) -> Result<u32, BuyError> {
        let player = self.players.get(&id).ok_or(BuyError::UnknownPlayer)?;
        if !player.alive {
            return Err(BuyError::Dead);
        }
        if !self.clock.buy_allowed(self.tick) {
            return Err(BuyError::BuyTimeOver);
        }
        let radius = self.economy.buy_zone_radius;
        if !self
            .map
            .spawn_points(player.team)
            .any(|s| s.position.distance(player.position) <= radius)
        {
            return Err(BuyError::OutsideBuyZone);
        }
        if !item.available_to(player.team) {
            return Err(BuyError::NotAvailable);
        }
        let price = item.price();
        if player.money < price {
            return Err(BuyError::InsufficientFunds);
        }
        let owned = match item {
            ShopItem::Weapon(kind) => player.inventory.has(kind),
            ShopItem::Equipment(_) => player.armor >= MAX_ARMOR,
        };
        if owned {
            return Err(BuyError::AlreadyOwned);
        }

        let economy = self.economy;
        let Some(player) = self.players.get_mut(&id) else {
            return Err(BuyError::UnknownPlayer);
        };
        player.money = economy.credit(player.money, -(price as i64));
        match item {
            ShopItem::Weapon(kind) => {
                player.inventory.give(kind);
            }
            ShopItem::Equipment(_) => {
                if let Some(armor) = item.armor_after(player.armor) {
                    player.armor = armor;
                }
            }
        }
        debug!(room_id = %self.id, player_id = %id, ?item, price, "Item purchased");
        self.events.push(MatchEvent::ItemPurchased { player_id: id, item, price });
        Ok(price)
    }

    fn use_objective(&mut self, id: PlayerId) -> CommandOutcome {
        let Some(player) = self.players.get(&id) else {
            return CommandOutcome::Ignored("unknown player");
        };
        if !player.alive {
            return CommandOutcome::Ignored("dead players cannot use objectives");
        }
        let position = player.position;

        match player.team {
            Team::T => {
                let Some(site) = self.map.bomb_site_at(position).map(|s| s.id.clone()) else {
                    return CommandOutcome::Ignored("not inside a bomb site");
                };
                if self.clock.plant(self.tick, id, &site, position).is_err() {
                    return CommandOutcome::Ignored("cannot plant now");
                }
                self.reward_objective(id);
                self.events.push(MatchEvent::BombPlanted { player_id: id, site });
                CommandOutcome::Applied
            }
            Team::Ct => match self.clock.begin_defuse(self.tick, id, position) {
                Ok(()) => {
                    self.events.push(MatchEvent::DefuseStarted { player_id: id });
                    CommandOutcome::Applied
                }
                Err(_) => CommandOutcome::Ignored("cannot defuse now"),
            },
        }
    }

    fn reward_objective(&mut self, id: PlayerId) {
        let reward = self.economy.objective_reward as i64;
        let economy = self.economy;
        if let Some(player) = self.players.get_mut(&id) {
            player.money = economy.credit(player.money, reward);
        }
    }

    fn fire(&mut self, shooter: PlayerId, aim: f32) {
        let Some(player) = self.players.get_mut(&shooter) else {
            return;
        };
        let origin = player.position;
        let owner_body = player.body;
        let kind = player.inventory.active().kind;
        let stats = kind.stats();
        let direction = Vec2::from_angle(aim);

        if kind.is_grenade() {
            player.inventory.discard_active();
            let detonate_tick = self.tick + secs_to_ticks(FUSE_SECS, self.tick_rate);
            self.grenades.push(Grenade::thrown(shooter, origin, aim, detonate_tick));
            self.events.push(MatchEvent::GrenadeThrown {
                player_id: shooter,
                origin,
                direction,
            });
            return;
        }
        player.stats.shots_fired += 1;

        self.events.push(MatchEvent::ShotFired {
            shooter_id: shooter,
            weapon: kind,
            origin,
            direction,
        });

        if kind.is_melee() {
            let owners = &self.body_owners;
            let hit = self.physics.raycast_filtered(origin, direction, stats.range, |b| {
                b.id != owner_body && owners.contains_key(&b.id)
            });
            if let Ok(Some(hit)) = hit {
                if let Some(&victim) = self.body_owners.get(&hit.body) {
                    let headshot = self.is_headshot(origin, direction, hit.body);
                    self.apply_damage(Some(shooter), victim, stats.damage, headshot, Some(kind));
                }
            }
            return;
        }

        let id = self.projectiles.insert(Projectile {
            owner: shooter,
            owner_body,
            weapon: kind,
            position: origin,
            direction,
            speed: stats.bullet_speed,
            damage: stats.damage,
            penetration_left: stats.penetration,
            travelled: 0.0,
            max_range: stats.range,
            passed: Vec::new(),
        });
        self.projectile_spawned.insert(id, self.tick);
        self.sweep_projectile(id, 1.0 / self.tick_rate as f32);
    }

    fn is_headshot(&self, origin: Vec2, direction: Vec2, body: BodyId) -> bool {
        let Some(target) = self.physics.body(body) else {
            return false;
        };
        let Collider::Circle { radius } = target.collider else {
            return false;
        };
        let offset = target.position - origin;
        let miss = (offset.x * direction.y - offset.y * direction.x).abs();
        miss <= radius * HEADSHOT_ZONE
    }

    fn drop_projectile(&mut self, id: ProjectileId) {
        self.projectiles.remove(id);
        self.projectile_spawned.remove(&id);
    }

    /// Move a projectile through one tick of travel, resolving what it hits
    fn sweep_projectile(&mut self, id: ProjectileId, dt: f32) {
        let Some(projectile) = self.projectiles.get(id) else {
            return;
        };
        let mut budget = (projectile.speed * dt).min(projectile.remaining_range());

        while budget > 0.0 {
            let Some(p) = self.projectiles.get(id).cloned() else {
                return;
            };
            let end = p.position + p.direction * budget;

            let body_hit = match self.physics.raycast_filtered(p.position, p.direction, budget, |b| {
                b.id != p.owner_body && !p.passed.contains(&b.id)
            }) {
                Ok(hit) => hit,
                Err(e) => {
                    warn!(room_id = %self.id, error = %e, "Dropping projectile with invalid ray");
                    self.drop_projectile(id);
                    return;
                }
            };
            let wall_hit = self.map.first_bullet_obstruction(p.position, end);

            let wall_first = match (&wall_hit, &body_hit) {
                (Some(wall), Some(body)) => wall.distance <= body.distance,
                (Some(_), None) => true,
                _ => false,
            };

            if wall_first {
                if let Some(wall) = wall_hit {
                    if self.map.damage_tile(wall.cell, p.damage) {
                        self.events.push(MatchEvent::TileDestroyed {
                            x: wall.cell.0,
                            y: wall.cell.1,
                        });
                    }
                }
                self.drop_projectile(id);
                return;
            }

            let Some(hit) = body_hit else {
                if let Some(p) = self.projectiles.get_mut(id) {
                    p.position = end;
                    p.travelled += budget;
                }
                break;
            };

            if let Some(&victim) = self.body_owners.get(&hit.body) {
                let headshot = self.is_headshot(p.position, p.direction, hit.body);
                self.apply_damage(Some(p.owner), victim, p.damage, headshot, Some(p.weapon));
                self.drop_projectile(id);
                return;
            }

            let mut falloff = PENETRATION_DAMAGE_FACTOR;
            if let Some(object_id) = self.object_bodies.get(&hit.body).cloned() {
                if let Some(object) = self.map.object(&object_id) {
                    falloff = object.bullet_penetration;
                }
                if self.map.damage_object(&object_id, p.damage) {
                    self.physics.remove_body(hit.body);
                    self.object_bodies.remove(&hit.body);
                    self.events.push(MatchEvent::ObjectDestroyed { object_id });
                }
            }

            if p.penetration_left == 0 || falloff <= 0.0 {
                self.drop_projectile(id);
                return;
            }
            if let Some(p) = self.projectiles.get_mut(id) {
                p.penetration_left -= 1;
                p.damage *= falloff;
                p.passed.push(hit.body);
                p.position = hit.point;
                p.travelled += hit.distance;
            }
            budget -= hit.distance;
        }

        if self.projectiles.get(id).is_some_and(|p| p.remaining_range() <= 0.0) {
            self.drop_projectile(id);
        }
    }

    /// Apply raw damage to `victim`. Attacker-less damage (the bomb) bypasses the phase gate.
    pub fn apply_damage(
        &mut self,
        attacker: Option<PlayerId>,
        victim: PlayerId,
        raw: f32,
        headshot: bool,
        weapon: Option<WeaponKind>,
    ) {
        if attacker.is_some() && !self.clock.combat_allowed() {
            return;
        }
        let tick = self.tick;
        let Some(target) = self.players.get_mut(&victim) else {
            return;
        };
        if !target.alive {
            return;
        }

        let outcome = mitigate(raw, headshot, target.armor);
        let before = target.health;
        target.health = (target.health - outcome.health_damage).max(0.0);
        target.armor = (target.armor - outcome.armor_damage).max(0.0);
        let dealt = before - target.health;
        let killed = target.health <= 0.0;
        if let Some(attacker) = attacker.filter(|a| *a != victim) {
            target.recent_attackers.push((attacker, tick));
        }

        if let Some(attacker) = attacker.and_then(|a| self.players.get_mut(&a)) {
            attacker.stats.damage_dealt += dealt;
            if headshot {
                attacker.stats.headshots += 1;
            }
        }

        if let Some(attacker) = attacker {
            self.events.push(MatchEvent::Hit {
                attacker_id: attacker,
                victim_id: victim,
                damage: dealt,
                headshot,
            });
        }

        if killed {
            self.kill(attacker, victim, weapon, headshot);
        }
    }

    fn kill(&mut self, killer: Option<PlayerId>, victim: PlayerId, weapon: Option<WeaponKind>, headshot: bool) {
        let tick = self.tick;
        let assist_ticks = self.assist_ticks;
        let Some(dead) = self.players.get_mut(&victim) else {
            return;
        };
        dead.alive = false;
        dead.stats.deaths += 1;
        dead.pending_move = Vec2::ZERO;
        dead.velocity = Vec2::ZERO;
        let victim_team = dead.team;
        dead.inventory.strip(WeaponKind::default_pistol(victim_team));
        let body = dead.body;
        let attackers = std::mem::take(&mut dead.recent_attackers);
        self.physics.set_enabled(body, false);

        if self.clock.cancel_defuse(victim) {
            self.events.push(MatchEvent::DefuseCancelled { player_id: victim });
        }

        let economy = self.economy;
        if let Some(killer_id) = killer.filter(|k| *k != victim) {
            if let Some(killer) = self.players.get_mut(&killer_id) {
                let team_kill = killer.team == victim_team;
                killer.money = economy.credit(killer.money, economy.kill_delta(headshot, team_kill));
                if !team_kill {
                    killer.stats.kills += 1;
                }
            }
        }

        let mut assisters: Vec<PlayerId> = attackers
            .into_iter()
            .filter(|(id, at)| Some(*id) != killer && tick.saturating_sub(*at) <= assist_ticks)
            .map(|(id, _)| id)
            .collect();
        assisters.sort();
        assisters.dedup();
        assisters.retain(|id| self.players.get(id).is_some_and(|p| p.team != victim_team));
        for id in &assisters {
            if let Some(assister) = self.players.get_mut(id) {
                assister.stats.assists += 1;
            }
        }

        debug!(room_id = %self.id, victim_id = %victim, killer_id = ?killer, "Player killed");
        self.events.push(MatchEvent::Kill {
            killer_id: killer,
            victim_id: victim,
            weapon,
            headshot,
            assister_ids: assisters,
        });
    }

    /// Advance the simulation by one fixed step
    pub fn advance(&mut self, dt: f32) -> Result<TickReport, MatchError> {
        let mut report = TickReport::default();
        let tick = self.tick;

        for player in self.players.values_mut() {
            if player.inventory.update_reload(tick) {
                self.events.push(MatchEvent::Reloaded { player_id: player.id });
            }
        }

        self.integrate_players(dt, &mut report);

        let in_flight: Vec<ProjectileId> = self
            .projectile_spawned
            .iter()
            .filter(|(_, spawned)| **spawned < tick)
            .map(|(id, _)| *id)
            .collect();
        for id in in_flight {
            self.sweep_projectile(id, dt);
        }
        self.update_grenades(dt);

        self.check_defuser();

        if let Some(event) = self.clock.tick(tick, self.team_counts()) {
            self.handle_clock_event(&event);
            report.clock.push(event);
        }

        report.reclaimed = self.reclaim_abandoned();
        self.check_invariants()?;
        self.tick += 1;
        Ok(report)
    }

    fn integrate_players(&mut self, dt: f32, report: &mut TickReport) {
        let moving = self.clock.movement_allowed() && dt > 0.0;

        for player in self.players.values_mut() {
            let Some(body) = self.physics.body_mut(player.body) else {
                continue;
            };
            body.velocity = if moving && player.alive && player.is_connected() {
                player.pending_move * (1.0 / dt)
            } else {
                Vec2::ZERO
            };
            player.pending_move = Vec2::ZERO;
        }

        let step = self.physics.integrate(dt);
        report.excluded_bodies = step.excluded;

        for player in self.players.values_mut() {
            if !player.alive {
                continue;
            }
            let Some(body) = self.physics.body_mut(player.body) else {
                continue;
            };
            let old = player.position;
            let new = body.position;
            let resolved = if footprint_walkable(&self.map, new) {
                new
            } else if footprint_walkable(&self.map, Vec2::new(new.x, old.y)) {
                Vec2::new(new.x, old.y)
            } else if footprint_walkable(&self.map, Vec2::new(old.x, new.y)) {
                Vec2::new(old.x, new.y)
            } else {
                old
            };

            body.position = resolved;
            body.velocity = Vec2::ZERO;
            player.velocity = if dt > 0.0 { (resolved - old) * (1.0 / dt) } else { Vec2::ZERO };
            player.position = resolved;
        }
    }

    fn check_defuser(&mut self) {
        let Some(defuse) = self.clock.bomb().and_then(|b| b.defuse.clone().map(|d| (d, b.position))) else {
            return;
        };
        let (defuse, bomb_position) = defuse;
        let radius = self.clock.rules().defuse_radius;
        let still_valid = self.players.get(&defuse.player).is_some_and(|p| {
            p.alive && p.is_connected() && p.position.distance(bomb_position) <= radius
        });
        if !still_valid && self.clock.cancel_defuse(defuse.player) {
            self.events.push(MatchEvent::DefuseCancelled { player_id: defuse.player });
        }
    }

    fn handle_clock_event(&mut self, event: &ClockEvent) {
        match *event {
            ClockEvent::RoundStarted { round } => {
                self.events.push(MatchEvent::RoundStarted { round });
            }
            ClockEvent::RoundEnded { round, reason } => {
                match reason {
                    RoundEndReason::BombExploded => self.detonate(),
                    RoundEndReason::BombDefused => {
                        let defuser = self
                            .clock
                            .bomb()
                            .and_then(|b| b.defuse.as_ref())
                            .map(|d| d.player);
                        if let Some(defuser) = defuser {
                            self.reward_objective(defuser);
                        }
                    }
                    _ => {}
                }
                let winner = reason.winner();
                let payout = self.economy.settle_round(winner, &mut self.streaks);
                let economy = self.economy;
                for player in self.players.values_mut() {
                    let amount = payout.for_team(player.team) as i64;
                    player.money = economy.credit(player.money, amount);
                }
                self.events.push(MatchEvent::RoundEnded { round, winner, reason });
            }
            ClockEvent::NextRound { .. } => self.reset_round(),
            ClockEvent::MatchOver { winner } => {
                self.projectiles.clear();
                self.projectile_spawned.clear();
                self.grenades.clear();
                self.events.push(MatchEvent::MatchOver { winner });
            }
        }
    }

    fn detonate(&mut self) {
        let Some(position) = self.clock.bomb().map(|b| b.position) else {
            return;
        };
        let rules = *self.clock.rules();
        self.events.push(MatchEvent::BombExploded { position });
        self.physics
            .apply_explosion_force(position, rules.bomb_radius, rules.bomb_damage);

        let victims: Vec<(PlayerId, f32)> = self
            .players
            .values()
            .filter(|p| p.alive)
            .filter_map(|p| {
                let distance = p.position.distance(position);
                (distance < rules.bomb_radius)
                    .then(|| (p.id, rules.bomb_damage * (1.0 - distance / rules.bomb_radius)))
            })
            .collect();
        for (id, damage) in victims {
            self.apply_damage(None, id, damage, false, None);
        }
    }

    fn update_grenades(&mut self, dt: f32) {
        let tick = self.tick;
        let mut due = Vec::new();
        let mut flying = Vec::with_capacity(self.grenades.len());
        for mut grenade in std::mem::take(&mut self.grenades) {
            if grenade.is_due(tick) {
                due.push(grenade);
            } else {
                grenade.advance(&self.map, dt);
                flying.push(grenade);
            }
        }
        self.grenades = flying;
        for grenade in due {
            self.explode_grenade(&grenade);
        }
    }

    /// Blast damage falls off linearly to zero at the edge; walls shield
    fn explode_grenade(&mut self, grenade: &Grenade) {
        let stats = WeaponKind::HeGrenade.stats();
        let radius = stats.range;
        let position = grenade.position;
        self.events.push(MatchEvent::GrenadeExploded {
            owner_id: grenade.owner,
            position,
        });
        self.physics.apply_explosion_force(position, radius, BLAST_FORCE);

        let victims: Vec<(PlayerId, f32)> = self
            .players
            .values()
            .filter(|p| p.alive)
            .filter_map(|p| {
                let distance = p.position.distance(position);
                (distance < radius && self.map.line_of_sight(position, p.position))
                    .then(|| (p.id, stats.damage * (1.0 - distance / radius)))
            })
            .collect();
        for (id, damage) in victims {
            self.apply_damage(Some(grenade.owner), id, damage, false, Some(WeaponKind::HeGrenade));
        }
    }

    fn reclaim_abandoned(&mut self) -> Vec<PlayerId> {
        let tick = self.tick;
        let grace = self.grace_ticks;
        let expired: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| match p.connection {
                Connection::Disconnected { since_tick } => tick.saturating_sub(since_tick) >= grace,
                Connection::Connected => false,
            })
            .map(|p| p.id)
            .collect();

        for id in &expired {
            info!(room_id = %self.id, player_id = %id, "Reconnect grace expired, reclaiming player");
            self.remove_player(*id);
        }
        expired
    }

    /// Verify bounds and body ownership for every player
    pub fn check_invariants(&self) -> Result<(), MatchError> {
        for player in self.players.values() {
            if !(0.0..=MAX_HEALTH).contains(&player.health) {
                return Err(MatchError::InvariantViolated(format!(
                    "player {} health {} out of range",
                    player.id, player.health
                )));
            }
            if !(0.0..=MAX_ARMOR).contains(&player.armor) {
                return Err(MatchError::InvariantViolated(format!(
                    "player {} armor {} out of range",
                    player.id, player.armor
                )));
            }
            if player.money > self.economy.max_money {
                return Err(MatchError::InvariantViolated(format!(
                    "player {} money {} above cap",
                    player.id, player.money
                )));
            }
            if self.body_owners.get(&player.body) != Some(&player.id) {
                return Err(MatchError::InvariantViolated(format!(
                    "player {} does not own body {:?}",
                    player.id, player.body
                )));
            }
            match self.physics.body(player.body) {
                Some(body) if body.enabled == player.alive => {}
                Some(_) => {
                    return Err(MatchError::InvariantViolated(format!(
                        "player {} body activity disagrees with alive={}",
                        player.id, player.alive
                    )))
                }
                None => {
                    return Err(MatchError::InvariantViolated(format!(
                        "player {} body {:?} missing",
                        player.id, player.body
                    )))
                }
            }
        }
        if self.body_owners.len() != self.players.len() {
            return Err(MatchError::InvariantViolated(
                "orphaned player bodies".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fixed bodies for every map object that provides cover
fn cover_bodies(physics: &mut PhysicsWorld, map: &GameMap) -> BTreeMap<BodyId, String> {
    let mut bodies = BTreeMap::new();
    for object in map.objects().iter().filter(|o| o.provides_cover) {
        let body = physics.add_body(RigidBody::fixed(
            Collider::Rectangle {
                width: object.size.x,
                height: object.size.y,
            },
            object.position,
        ));
        bodies.insert(body, object.id.clone());
    }
    bodies
}

/// Centre and the four axis extremes of a player footprint must be walkable
fn footprint_walkable(map: &GameMap, center: Vec2) -> bool {
    let r = PLAYER_RADIUS * 0.75;
    [
        center,
        center + Vec2::new(r, 0.0),
        center - Vec2::new(r, 0.0),
        center + Vec2::new(0.0, r),
        center - Vec2::new(0.0, r),
    ]
    .into_iter()
    .all(|p| map.is_walkable(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::Slot;
    use crate::game::map::{BombSite, MapObject, ObjectKind, Rect, SpawnPoint, Tile};
    use crate::game::shop::Equipment;
    use assert_approx_eq::assert_approx_eq;

    fn arena() -> MapData {
        // 20x10 open floor with a wall column at x=15
        let mut tiles = vec![vec![Tile::floor("floor"); 20]; 10];
        for row in tiles.iter_mut() {
            row[15] = Tile::wall("wall");
        }
        MapData {
            name: "arena".into(),
            tile_size: 32.0,
            tiles,
            spawn_points: vec![
                SpawnPoint { id: "ct".into(), position: Vec2::new(100.0, 100.0), team: Team::Ct, angle: 0.0 },
                SpawnPoint { id: "t".into(), position: Vec2::new(300.0, 100.0), team: Team::T, angle: 0.0 },
            ],
            bomb_sites: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// The arena with bomb site A drawn around the T spawn
    fn site_arena() -> MapData {
        let mut map = arena();
        map.bomb_sites.push(BombSite {
            id: "a".into(),
            name: "A".into(),
            bounds: Rect { x: 280.0, y: 80.0, width: 40.0, height: 40.0 },
        });
        map
    }

    /// Freeze time skipped, first tick already live
    fn live_state(config: SimConfig, map: MapData) -> (MatchState, PlayerId, PlayerId) {
        let mut state = MatchState::new(Uuid::new_v4(), 5, &config, map).unwrap();
        let (ct, t) = pair(&mut state);
        state.start_match().unwrap();
        state.advance(1.0 / 64.0).unwrap();
        assert_eq!(state.phase(), RoundPhase::RoundActive);
        state.drain_events();
        (state, ct, t)
    }

    fn state() -> MatchState {
        MatchState::new(Uuid::new_v4(), 7, &SimConfig::default(), arena()).unwrap()
    }

    fn command(player_id: PlayerId, sequence: u64, action: Action) -> InputCommand {
        InputCommand { player_id, sequence, timestamp: sequence * 16, action }
    }

    fn pair(state: &mut MatchState) -> (PlayerId, PlayerId) {
        let ct = Uuid::new_v4();
        let t = Uuid::new_v4();
        state.add_player(ct, "ct".into(), Some(Team::Ct), Some(WeaponKind::Ak47)).unwrap();
        state.add_player(t, "t".into(), Some(Team::T), None).unwrap();
        (ct, t)
    }

    /// Aim from `from` straight at `to`
    fn aim_at(state: &MatchState, from: PlayerId, to: PlayerId) -> f32 {
        let d = state.player(to).unwrap().position - state.player(from).unwrap().position;
        d.y.atan2(d.x)
    }

    #[test]
    fn move_commands_translate_the_body() {
        let mut state = state();
        let (ct, _) = pair(&mut state);
        let dt = 1.0 / 64.0;

        state
            .apply_command(&command(ct, 1, Action::Move { delta: Vec2::new(3.0, 0.0), stance: Stance::Running, aim: 0.0 }))
            .unwrap();
        state.advance(dt).unwrap();

        let player = state.player(ct).unwrap();
        assert_approx_eq!(player.position.x, 103.0, 1e-3);
        assert_approx_eq!(player.velocity.x, 192.0, 1e-2);
        assert_eq!(player.last_sequence, 1);
        assert_eq!(state.physics().body(player.body).unwrap().position, player.position);
    }

    #[test]
    fn walls_stop_movement() {
        let mut state = state();
        let (_, t) = pair(&mut state);
        // T spawn is at x=300 and the wall column starts at x=480
        for seq in 1..=100 {
            state
                .apply_command(&command(t, seq, Action::Move { delta: Vec2::new(3.0, 0.0), stance: Stance::Running, aim: 0.0 }))
                .unwrap();
            state.advance(1.0 / 64.0).unwrap();
        }
        let x = state.player(t).unwrap().position.x;
        assert!(x < 480.0 - PLAYER_RADIUS * 0.75 + 3.0, "walked into the wall: {x}");
    }

    #[test]
    fn freeze_time_blocks_movement() {
        let mut state = state();
        let (ct, _) = pair(&mut state);
        state.start_match().unwrap();
        assert_eq!(state.phase(), RoundPhase::FreezeTime);

        let start = state.player(ct).unwrap().position;
        state
            .apply_command(&command(ct, 1, Action::Move { delta: Vec2::new(3.0, 0.0), stance: Stance::Running, aim: 0.0 }))
            .unwrap();
        state.advance(1.0 / 64.0).unwrap();
        assert_eq!(state.player(ct).unwrap().position, start);
    }

    #[test]
    fn shot_hits_and_damages_the_target() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        let aim = aim_at(&state, ct, t);

        state.apply_command(&command(ct, 1, Action::Shoot { aim })).unwrap();
        for _ in 0..10 {
            state.advance(1.0 / 64.0).unwrap();
        }

        // dead-centre aim is a headshot: 36 * 4
        let target = state.player(t).unwrap();
        assert!(!target.alive);
        assert_eq!(target.health, 0.0);
        let shooter = state.player(ct).unwrap();
        assert_eq!(shooter.stats.kills, 1);
        assert_eq!(shooter.stats.headshots, 1);
        assert_eq!(shooter.money, 800 + 300 + 100);
        assert!(!state.physics().body(target.body).unwrap().enabled);
        assert!(state.projectiles().is_empty());

        let events = state.drain_events();
        assert!(events.iter().any(|e| matches!(e, MatchEvent::Kill { victim_id, headshot: true, .. } if *victim_id == t)));
    }

    #[test]
    fn off_centre_hit_is_a_body_shot() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        // 200px away, aiming 10px off centre
        let aim = (10.0f32 / 200.0).atan();
        assert_approx_eq!(aim_at(&state, ct, t), 0.0, 1e-6);

        state.apply_command(&command(ct, 1, Action::Shoot { aim })).unwrap();
        for _ in 0..10 {
            state.advance(1.0 / 64.0).unwrap();
        }
        let target = state.player(t).unwrap();
        assert!(target.alive);
        assert_approx_eq!(target.health, 64.0, 1e-3);
    }

    #[test]
    fn team_kill_costs_money() {
        let mut state = state();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        state.add_player(a, "a".into(), Some(Team::Ct), Some(WeaponKind::Awp)).unwrap();
        state.add_player(b, "b".into(), Some(Team::Ct), None).unwrap();
        state.apply_damage(Some(a), b, 500.0, false, Some(WeaponKind::Awp));

        let shooter = state.player(a).unwrap();
        assert_eq!(shooter.money, 500);
        assert_eq!(shooter.stats.kills, 0);
    }

    #[test]
    fn assists_go_to_recent_attackers_on_the_other_team() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        let helper = Uuid::new_v4();
        state.add_player(helper, "helper".into(), Some(Team::Ct), None).unwrap();

        state.apply_damage(Some(helper), t, 40.0, false, Some(WeaponKind::Usp));
        state.apply_damage(Some(ct), t, 80.0, false, Some(WeaponKind::Ak47));

        assert!(!state.player(t).unwrap().alive);
        assert_eq!(state.player(helper).unwrap().stats.assists, 1);
        assert_eq!(state.player(ct).unwrap().stats.assists, 0);
        assert_eq!(state.player(ct).unwrap().stats.kills, 1);
    }

    #[test]
    fn armor_halves_incoming_damage() {
        let mut config = SimConfig::default();
        config.rules.spawn_armor = 100.0;
        let mut state = MatchState::new(Uuid::new_v4(), 1, &config, arena()).unwrap();
        let (ct, t) = pair(&mut state);

        state.apply_damage(Some(ct), t, 36.0, false, Some(WeaponKind::Ak47));
        let target = state.player(t).unwrap();
        assert_approx_eq!(target.health, 82.0, 1e-4);
        assert_approx_eq!(target.armor, 91.0, 1e-4);
    }

    #[test]
    fn elimination_pays_out_and_starts_next_round() {
        let mut config = SimConfig::default();
        config.rules.freeze_secs = 0.0;
        config.rules.round_end_delay_secs = 0.1;
        let mut state = MatchState::new(Uuid::new_v4(), 3, &config, arena()).unwrap();
        let (ct, t) = pair(&mut state);
        state.start_match().unwrap();
        state.advance(1.0 / 64.0).unwrap();
        assert_eq!(state.phase(), RoundPhase::RoundActive);

        state.apply_damage(Some(ct), t, 500.0, false, Some(WeaponKind::Ak47));
        state.advance(1.0 / 64.0).unwrap();
        assert_eq!(state.phase(), RoundPhase::RoundEnd);
        assert_eq!(state.score().ct, 1);
        assert_eq!(state.player(ct).unwrap().money, 800 + 300 + 3250);
        assert_eq!(state.player(t).unwrap().money, 800 + 1400);

        for _ in 0..10 {
            state.advance(1.0 / 64.0).unwrap();
        }
        assert_eq!(state.clock().round(), 2);
        let revived = state.player(t).unwrap();
        assert!(revived.alive);
        assert_eq!(revived.health, 100.0);
        assert!(state.physics().body(revived.body).unwrap().enabled);
    }

    #[test]
    fn disconnected_player_is_reclaimed_after_grace() {
        let mut config = SimConfig::default();
        config.reconnect_grace_secs = 0.5;
        let mut state = MatchState::new(Uuid::new_v4(), 3, &config, arena()).unwrap();
        let (ct, _) = pair(&mut state);
        let body = state.player(ct).unwrap().body;

        assert!(state.mark_disconnected(ct));
        assert!(!state.mark_disconnected(ct));
        // grace is 32 ticks, counted from the tick of the disconnect
        for _ in 0..32 {
            state.advance(1.0 / 64.0).unwrap();
        }
        assert!(state.player(ct).is_some());

        let report = state.advance(1.0 / 64.0).unwrap();
        assert_eq!(report.reclaimed, vec![ct]);
        assert!(state.player(ct).is_none());
        assert!(state.physics().body(body).is_none());
    }

    #[test]
    fn reconnect_within_grace_keeps_the_player() {
        let mut state = state();
        let (ct, _) = pair(&mut state);
        state
            .apply_command(&command(ct, 1, Action::Reload))
            .unwrap();
        state.mark_disconnected(ct);
        state.advance(1.0 / 64.0).unwrap();

        assert_eq!(state.reconnect(ct).unwrap(), 1);
        assert!(state.player(ct).unwrap().is_connected());
        assert!(matches!(state.reconnect(Uuid::new_v4()), Err(MatchError::UnknownPlayer(_))));
    }

    #[test]
    fn room_capacity_and_duplicates_are_enforced() {
        let mut config = SimConfig::default();
        config.max_players_per_room = 2;
        let mut state = MatchState::new(Uuid::new_v4(), 3, &config, arena()).unwrap();
        let (ct, _) = pair(&mut state);

        assert!(matches!(
            state.add_player(ct, "again".into(), None, None),
            Err(MatchError::DuplicatePlayer(_))
        ));
        assert!(matches!(
            state.add_player(Uuid::new_v4(), "third".into(), None, None),
            Err(MatchError::RoomFull(2))
        ));
    }

    #[test]
    fn auto_balance_fills_the_smaller_team() {
        let mut state = state();
        let first = state.add_player(Uuid::new_v4(), "a".into(), None, None).unwrap().team;
        let second = state.add_player(Uuid::new_v4(), "b".into(), None, None).unwrap().team;
        assert_eq!(first, Team::Ct);
        assert_eq!(second, Team::T);
    }

    #[test]
    fn chat_is_trimmed_and_relayed() {
        let mut state = state();
        let (ct, _) = pair(&mut state);
        let outcome = state
            .apply_command(&command(ct, 1, Action::Chat { text: "  gl hf  ".into() }))
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Chat("gl hf".into()));
    }

    #[test]
    fn invariants_hold_through_a_busy_tick() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        let aim = aim_at(&state, ct, t);
        for seq in 1..=5 {
            state.apply_command(&command(ct, seq, Action::Shoot { aim })).unwrap();
            state.advance(1.0 / 64.0).unwrap();
        }
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn weapons_cycle_on_server_ticks() {
        let mut state = state();
        let (ct, _) = pair(&mut state);
        let aim = std::f32::consts::FRAC_PI_2;

        let first = state.apply_command(&command(ct, 1, Action::Shoot { aim })).unwrap();
        let second = state.apply_command(&command(ct, 2, Action::Shoot { aim })).unwrap();
        assert_eq!(first, CommandOutcome::Applied);
        assert_eq!(second, CommandOutcome::Ignored("weapon is still cycling"));

        // 600 rpm at 64 Hz is one shot every 6 ticks
        for _ in 0..6 {
            state.advance(1.0 / 64.0).unwrap();
        }
        let third = state.apply_command(&command(ct, 3, Action::Shoot { aim })).unwrap();
        assert_eq!(third, CommandOutcome::Applied);

        let shooter = state.player(ct).unwrap();
        assert_eq!(shooter.stats.shots_fired, 2);
        assert_eq!(shooter.inventory.active().ammo, 28);
    }

    #[test]
    fn buying_checks_money_team_and_ownership() {
        let mut state = state();
        let (ct, t) = pair(&mut state);

        assert_eq!(state.buy(t, ShopItem::Weapon(WeaponKind::Ak47)), Err(BuyError::InsufficientFunds));
        assert_eq!(state.buy(t, ShopItem::Weapon(WeaponKind::M4a4)), Err(BuyError::NotAvailable));
        assert_eq!(state.buy(t, ShopItem::Weapon(WeaponKind::Knife)), Err(BuyError::NotAvailable));
        assert_eq!(state.buy(t, ShopItem::Equipment(Equipment::Kevlar)), Ok(650));
        let buyer = state.player(t).unwrap();
        assert_eq!(buyer.money, 150);
        assert_eq!(buyer.armor, 100.0);
        assert_eq!(state.buy(t, ShopItem::Equipment(Equipment::KevlarHelmet)), Err(BuyError::InsufficientFunds));
        if let Some(player) = state.players.get_mut(&t) {
            player.money = 5000;
        }
        assert_eq!(state.buy(t, ShopItem::Equipment(Equipment::KevlarHelmet)), Err(BuyError::AlreadyOwned));

        assert_eq!(state.buy(ct, ShopItem::Weapon(WeaponKind::Ak47)), Err(BuyError::NotAvailable));
        assert_eq!(state.buy(ct, ShopItem::Weapon(WeaponKind::Usp)), Err(BuyError::AlreadyOwned));
        assert_eq!(state.buy(Uuid::new_v4(), ShopItem::Weapon(WeaponKind::Usp)), Err(BuyError::UnknownPlayer));

        let outcome = state
            .apply_command(&command(ct, 1, Action::Buy { item: ShopItem::Weapon(WeaponKind::Deagle) }))
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Applied);
        let ct_player = state.player(ct).unwrap();
        assert_eq!(ct_player.money, 150);
        assert_eq!(ct_player.inventory.active().kind, WeaponKind::Deagle);
        assert_eq!(ct_player.inventory.kinds(), vec![WeaponKind::Ak47, WeaponKind::Deagle, WeaponKind::Knife]);

        let events = state.drain_events();
        assert!(events.iter().any(|e| matches!(e,
            MatchEvent::ItemPurchased { player_id, price: 650, .. } if *player_id == ct)));
    }

    #[test]
    fn buying_needs_a_buy_zone_and_buy_time() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        if let Some(player) = state.players.get_mut(&t) {
            player.position = Vec2::new(600.0, 100.0);
        }
        assert_eq!(state.buy(t, ShopItem::Equipment(Equipment::Kevlar)), Err(BuyError::OutsideBuyZone));

        state.apply_damage(Some(t), ct, 500.0, false, Some(WeaponKind::Glock));
        assert_eq!(state.buy(ct, ShopItem::Equipment(Equipment::Kevlar)), Err(BuyError::Dead));

        let mut config = SimConfig::default();
        config.rules.freeze_secs = 0.0;
        config.rules.buy_secs = 0.0;
        let (mut live, ct, _) = live_state(config, arena());
        assert_eq!(live.buy(ct, ShopItem::Equipment(Equipment::Kevlar)), Err(BuyError::BuyTimeOver));

        let mut frozen = MatchState::new(Uuid::new_v4(), 5, &SimConfig::default(), arena()).unwrap();
        let (ct, _) = pair(&mut frozen);
        frozen.start_match().unwrap();
        assert_eq!(frozen.phase(), RoundPhase::FreezeTime);
        assert_eq!(frozen.buy(ct, ShopItem::Equipment(Equipment::Kevlar)), Ok(650));
    }

    #[test]
    fn money_never_exceeds_the_cap() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        if let Some(player) = state.players.get_mut(&ct) {
            player.money = 15_900;
        }
        state.apply_damage(Some(ct), t, 500.0, true, Some(WeaponKind::Ak47));
        assert_eq!(state.player(ct).unwrap().money, 16_000);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn switching_draws_another_carried_weapon() {
        let mut state = state();
        let (ct, _) = pair(&mut state);
        let switch = |slot| Action::Switch { slot };

        assert_eq!(state.apply_command(&command(ct, 1, switch(Slot::Secondary))).unwrap(), CommandOutcome::Applied);
        assert_eq!(state.player(ct).unwrap().inventory.active().kind, WeaponKind::Usp);
        assert_eq!(
            state.apply_command(&command(ct, 2, switch(Slot::Secondary))).unwrap(),
            CommandOutcome::Ignored("nothing to switch to")
        );
        assert_eq!(
            state.apply_command(&command(ct, 3, switch(Slot::Grenade))).unwrap(),
            CommandOutcome::Ignored("nothing to switch to")
        );
        assert_eq!(state.apply_command(&command(ct, 4, switch(Slot::Melee))).unwrap(), CommandOutcome::Applied);
        assert_eq!(state.player(ct).unwrap().inventory.active().kind, WeaponKind::Knife);
    }

    #[test]
    fn dying_drops_everything_but_the_knife_and_a_pistol() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        state.apply_damage(Some(t), ct, 500.0, false, Some(WeaponKind::Glock));
        let dead = state.player(ct).unwrap();
        assert_eq!(dead.inventory.kinds(), vec![WeaponKind::Usp, WeaponKind::Knife]);
    }

    #[test]
    fn grenade_flies_then_explodes_with_falloff_and_knockback() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        assert_eq!(state.buy(ct, ShopItem::Weapon(WeaponKind::HeGrenade)), Ok(300));

        let outcome = state.apply_command(&command(ct, 1, Action::Shoot { aim: 0.0 })).unwrap();
        assert_eq!(outcome, CommandOutcome::Applied);
        let thrower = state.player(ct).unwrap();
        assert!(!thrower.inventory.has(WeaponKind::HeGrenade));
        assert_eq!(thrower.inventory.active().kind, WeaponKind::Ak47);
        assert_eq!(thrower.stats.shots_fired, 0);
        assert_eq!(state.grenades().len(), 1);

        // 1.5 s fuse: 96 ticks of flight, the blast on the 97th
        for _ in 0..96 {
            state.advance(1.0 / 64.0).unwrap();
        }
        assert_eq!(state.grenades().len(), 1);
        let landing = state.grenades()[0].position;
        assert!(landing.x > 390.0 && landing.x < 410.0, "landed at {:?}", landing);
        state.advance(1.0 / 64.0).unwrap();
        assert!(state.grenades().is_empty());

        // ~99px from the T: 98 * (1 - 99/350)
        let target = state.player(t).unwrap();
        assert_approx_eq!(target.health, 29.75, 1.0);
        assert!(state.physics().body(target.body).unwrap().velocity.x < 0.0);
        assert!(state.player(ct).unwrap().health < 100.0);

        let events = state.drain_events();
        assert!(events.iter().any(|e| matches!(e, MatchEvent::GrenadeThrown { player_id, .. } if *player_id == ct)));
        assert!(events.iter().any(|e| matches!(e, MatchEvent::GrenadeExploded { owner_id, .. } if *owner_id == ct)));
    }

    #[test]
    fn walls_shield_players_from_the_blast() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        if let Some(player) = state.players.get_mut(&t) {
            player.position = Vec2::new(540.0, 100.0);
        }
        let grenade = Grenade::thrown(ct, Vec2::new(440.0, 100.0), 0.0, 0);
        state.explode_grenade(&grenade);
        assert_eq!(state.player(t).unwrap().health, 100.0);
    }

    #[test]
    fn planting_pays_the_planter() {
        let mut config = SimConfig::default();
        config.rules.freeze_secs = 0.0;
        let (mut state, ct, t) = live_state(config, site_arena());

        assert_eq!(
            state.apply_command(&command(ct, 1, Action::Use)).unwrap(),
            CommandOutcome::Ignored("cannot defuse now")
        );
        assert_eq!(state.apply_command(&command(t, 1, Action::Use)).unwrap(), CommandOutcome::Applied);
        assert_eq!(state.player(t).unwrap().money, 800 + 300);
        assert_eq!(state.clock().bomb().unwrap().site, "a");
        assert!(state
            .drain_events()
            .iter()
            .any(|e| matches!(e, MatchEvent::BombPlanted { player_id, site } if *player_id == t && site == "a")));

        assert_eq!(
            state.apply_command(&command(t, 2, Action::Use)).unwrap(),
            CommandOutcome::Ignored("cannot plant now")
        );
    }

    #[test]
    fn completed_defuse_wins_the_round_and_pays_the_defuser() {
        let mut config = SimConfig::default();
        config.rules.freeze_secs = 0.0;
        config.rules.defuse_secs = 0.5;
        config.rules.defuse_radius = 250.0;
        let (mut state, ct, t) = live_state(config, site_arena());

        state.apply_command(&command(t, 1, Action::Use)).unwrap();
        assert_eq!(state.apply_command(&command(ct, 1, Action::Use)).unwrap(), CommandOutcome::Applied);

        let mut events = Vec::new();
        for _ in 0..64 {
            state.advance(1.0 / 64.0).unwrap();
            events.extend(state.drain_events());
            if state.phase() == RoundPhase::RoundEnd {
                break;
            }
        }

        assert!(events.iter().any(|e| matches!(e,
            MatchEvent::RoundEnded { winner: Some(Team::Ct), reason: RoundEndReason::BombDefused, .. })));
        assert_eq!(state.score().ct, 1);
        assert_eq!(state.player(ct).unwrap().money, 800 + 300 + 3250);
        assert_eq!(state.player(t).unwrap().money, 800 + 300 + 1400);
    }

    #[test]
    fn detonation_damages_by_distance_and_pushes_bodies() {
        let mut config = SimConfig::default();
        config.rules.freeze_secs = 0.0;
        config.rules.bomb_secs = 0.5;
        config.rules.bomb_damage = 100.0;
        let (mut state, ct, t) = live_state(config, site_arena());

        state.apply_command(&command(t, 1, Action::Use)).unwrap();
        let mut events = Vec::new();
        for _ in 0..64 {
            state.advance(1.0 / 64.0).unwrap();
            events.extend(state.drain_events());
            if state.phase() == RoundPhase::RoundEnd {
                break;
            }
        }

        assert!(events.iter().any(|e| matches!(e, MatchEvent::BombExploded { .. })));
        assert!(events.iter().any(|e| matches!(e,
            MatchEvent::Kill { killer_id: None, victim_id, .. } if *victim_id == t)));
        assert_eq!(state.score().t, 1);

        // 200px from a 500px blast: 100 * (1 - 200/500)
        let survivor = state.player(ct).unwrap();
        assert!(survivor.alive);
        assert_approx_eq!(survivor.health, 40.0, 1e-3);
        let push = state.physics().body(survivor.body).unwrap().velocity;
        assert_approx_eq!(push.x, -60.0, 1e-3);
        assert!(!state.player(t).unwrap().alive);
    }

    #[test]
    fn loading_a_map_rebuilds_cover_and_respawns() {
        let mut state = state();
        let (ct, t) = pair(&mut state);
        let bodies_before = state.physics().len();

        let mut next = arena();
        next.name = "arena_crates".into();
        next.spawn_points[0].position = Vec2::new(100.0, 250.0);
        next.objects.push(MapObject {
            id: "crate_1".into(),
            kind: ObjectKind::Crate,
            position: Vec2::new(200.0, 200.0),
            size: Vec2::new(32.0, 32.0),
            health: 100.0,
            destructible: true,
            provides_cover: true,
            bullet_penetration: 0.5,
        });
        state.load_map(next).unwrap();

        assert_eq!(state.map().name(), "arena_crates");
        assert_eq!(state.physics().len(), bodies_before + 1);
        assert!(state.physics().bodies().any(|b| b.is_static && b.position == Vec2::new(200.0, 200.0)));
        let moved = state.player(ct).unwrap();
        assert_eq!(moved.position, Vec2::new(100.0, 250.0));
        assert_eq!(state.physics().body(moved.body).unwrap().position, moved.position);
        assert!(state.player(t).unwrap().alive);
        assert!(state.drain_events().iter().any(|e| matches!(e, MatchEvent::MapLoaded { name } if name == "arena_crates")));

        let mut bare = arena();
        bare.name = "bare".into();
        state.load_map(bare).unwrap();
        assert_eq!(state.physics().len(), bodies_before);

        let mut broken = arena();
        broken.tile_size = 0.0;
        assert!(matches!(state.load_map(broken), Err(MatchError::Map(_))));
        assert_eq!(state.map().name(), "bare");

        state.start_match().unwrap();
        assert!(matches!(state.load_map(arena()), Err(MatchError::AlreadyStarted)));
    }
}
