//! Combat system - weapon tables, ammunition and damage mitigation

use serde::{Deserialize, Serialize};

use super::Team;

/// Damage multiplier applied to headshots before armor
pub const HEADSHOT_MULTIPLIER: f32 = 4.0;
/// Share of damage that reaches health while armor remains
pub const ARMOR_HEALTH_RATIO: f32 = 0.5;
/// Damage multiplier per wall/object a bullet passes through
pub const PENETRATION_DAMAGE_FACTOR: f32 = 0.5;

pub const MAX_HEALTH: f32 = 100.0;
pub const MAX_ARMOR: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    Knife,
    Glock,
    Usp,
    Deagle,
    Mp5,
    P90,
    Ak47,
    M4a4,
    Awp,
    HeGrenade,
}

/// Inventory slot a weapon occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Primary,
    Secondary,
    Melee,
    Grenade,
}

/// Static weapon parameters
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Base damage per hit
    pub damage: f32,
    /// Rounds per minute
    pub fire_rate: f32,
    pub reload_ms: u32,
    pub magazine: u32,
    pub reserve: u32,
    /// Projectile speed in px/s; melee weapons resolve instantly
    pub bullet_speed: f32,
    /// Maximum travel distance in px
    pub range: f32,
    /// Number of objects a bullet may pass through
    pub penetration: u32,
    /// Movement speed multiplier while held
    pub move_speed: f32,
    pub price: u32,
}

impl WeaponStats {
    pub fn for_kind(kind: WeaponKind) -> Self {
        match kind {
            WeaponKind::Knife => Self {
                damage: 65.0,
                fire_rate: 120.0,
                reload_ms: 0,
                magazine: 0,
                reserve: 0,
                bullet_speed: 0.0,
                range: 50.0,
                penetration: 0,
                move_speed: 1.2,
                price: 0,
            },
            WeaponKind::Glock => Self {
                damage: 28.0,
                fire_rate: 400.0,
                reload_ms: 2200,
                magazine: 20,
                reserve: 120,
                bullet_speed: 2000.0,
                range: 1500.0,
                penetration: 1,
                move_speed: 1.0,
                price: 200,
            },
            WeaponKind::Usp => Self {
                damage: 35.0,
                fire_rate: 352.0,
                reload_ms: 2200,
                magazine: 12,
                reserve: 24,
                bullet_speed: 2000.0,
                range: 2000.0,
                penetration: 1,
                move_speed: 1.0,
                price: 200,
            },
            WeaponKind::Deagle => Self {
                damage: 48.0,
                fire_rate: 267.0,
                reload_ms: 2200,
                magazine: 7,
                reserve: 35,
                bullet_speed: 2200.0,
                range: 3000.0,
                penetration: 2,
                move_speed: 0.93,
                price: 650,
            },
            WeaponKind::Mp5 => Self {
                damage: 27.0,
                fire_rate: 750.0,
                reload_ms: 2900,
                magazine: 30,
                reserve: 120,
                bullet_speed: 2000.0,
                range: 2500.0,
                penetration: 1,
                move_speed: 0.95,
                price: 1500,
            },
            WeaponKind::P90 => Self {
                damage: 26.0,
                fire_rate: 857.0,
                reload_ms: 3300,
                magazine: 50,
                reserve: 100,
                bullet_speed: 2000.0,
                range: 2500.0,
                penetration: 1,
                move_speed: 0.93,
                price: 2350,
            },
            WeaponKind::Ak47 => Self {
                damage: 36.0,
                fire_rate: 600.0,
                reload_ms: 2500,
                magazine: 30,
                reserve: 90,
                bullet_speed: 2500.0,
                range: 4000.0,
                penetration: 2,
                move_speed: 0.89,
                price: 2500,
            },
            WeaponKind::M4a4 => Self {
                damage: 33.0,
                fire_rate: 666.0,
                reload_ms: 3100,
                magazine: 30,
                reserve: 90,
                bullet_speed: 2500.0,
                range: 4000.0,
                penetration: 2,
                move_speed: 0.9,
                price: 3100,
            },
            WeaponKind::Awp => Self {
                damage: 115.0,
                fire_rate: 41.0,
                reload_ms: 3700,
                magazine: 10,
                reserve: 30,
                bullet_speed: 3500.0,
                range: 8000.0,
                penetration: 3,
                move_speed: 0.81,
                price: 4750,
            },
            // thrown: range is the blast radius
            WeaponKind::HeGrenade => Self {
                damage: 98.0,
                fire_rate: 60.0,
                reload_ms: 0,
                magazine: 1,
                reserve: 0,
                bullet_speed: 0.0,
                range: 350.0,
                penetration: 0,
                move_speed: 1.0,
                price: 300,
            },
        }
    }

    /// Minimum milliseconds between shots at the nominal fire rate
    pub fn shot_interval_ms(&self) -> f32 {
        60_000.0 / self.fire_rate
    }

    /// Whole ticks between shots, rounded down so a client firing at the
    /// nominal rate is never refused by tick quantisation
    pub fn shot_interval_ticks(&self, tick_rate: u32) -> u64 {
        ((self.shot_interval_ms() * tick_rate as f32 / 1000.0).floor() as u64).max(1)
    }
}

impl WeaponKind {
    pub fn stats(self) -> WeaponStats {
        WeaponStats::for_kind(self)
    }

    pub fn is_melee(self) -> bool {
        matches!(self, WeaponKind::Knife)
    }

    pub fn is_grenade(self) -> bool {
        matches!(self, WeaponKind::HeGrenade)
    }

    pub fn slot(self) -> Slot {
        match self {
            WeaponKind::Knife => Slot::Melee,
            WeaponKind::Glock | WeaponKind::Usp | WeaponKind::Deagle => Slot::Secondary,
            WeaponKind::HeGrenade => Slot::Grenade,
            _ => Slot::Primary,
        }
    }

    /// Team-locked weapons; everything else is on both shop lists
    pub fn available_to(self, team: Team) -> bool {
        match self {
            WeaponKind::Glock | WeaponKind::Ak47 => team == Team::T,
            WeaponKind::Usp | WeaponKind::M4a4 => team == Team::Ct,
            _ => true,
        }
    }

    /// Pistol every player of `team` spawns with
    pub fn default_pistol(team: Team) -> Self {
        match team {
            Team::Ct => WeaponKind::Usp,
            Team::T => WeaponKind::Glock,
        }
    }
}

/// Why a weapon did not fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FireBlocked {
    #[error("weapon is still cycling")]
    Cycling,

    #[error("weapon is reloading")]
    Reloading,

    #[error("magazine is empty")]
    Empty,
}

/// A carried weapon with its ammunition state
#[derive(Debug, Clone, PartialEq)]
pub struct WeaponSlot {
    pub kind: WeaponKind,
    pub ammo: u32,
    pub reserve: u32,
    /// Tick at which an in-progress reload completes
    pub reload_done_tick: Option<u64>,
    /// First tick the weapon may fire again
    pub next_fire_tick: u64,
}

impl WeaponSlot {
    pub fn new(kind: WeaponKind) -> Self {
        let stats = kind.stats();
        Self {
            kind,
            ammo: stats.magazine,
            reserve: stats.reserve,
            reload_done_tick: None,
            next_fire_tick: 0,
        }
    }

    pub fn is_reloading(&self) -> bool {
        self.reload_done_tick.is_some()
    }

    /// Consume one round if the weapon can fire on `now_tick`. The cycle time
    /// is enforced on server ticks regardless of client timestamps.
    pub fn try_fire(&mut self, now_tick: u64, tick_rate: u32) -> Result<(), FireBlocked> {
        if now_tick < self.next_fire_tick {
            return Err(FireBlocked::Cycling);
        }
        if !self.kind.is_melee() {
            if self.is_reloading() {
                return Err(FireBlocked::Reloading);
            }
            if self.ammo == 0 {
                return Err(FireBlocked::Empty);
            }
            self.ammo -= 1;
        }
        self.next_fire_tick = now_tick + self.kind.stats().shot_interval_ticks(tick_rate);
        Ok(())
    }

    /// Begin a reload; returns false if there is nothing to reload
    pub fn start_reload(&mut self, now_tick: u64, tick_rate: u32) -> bool {
        let stats = self.kind.stats();
        if self.kind.is_melee()
            || self.kind.is_grenade()
            || self.is_reloading()
            || self.reserve == 0
            || self.ammo >= stats.magazine
        {
            return false;
        }
        let ticks = (stats.reload_ms as u64 * tick_rate as u64).div_ceil(1000);
        self.reload_done_tick = Some(now_tick + ticks);
        true
    }

    /// Complete a due reload; returns true on the tick it finishes
    pub fn update_reload(&mut self, now_tick: u64) -> bool {
        match self.reload_done_tick {
            Some(done) if now_tick >= done => {
                let needed = self.kind.stats().magazine - self.ammo;
                let loaded = needed.min(self.reserve);
                self.ammo += loaded;
                self.reserve -= loaded;
                self.reload_done_tick = None;
                true
            }
            _ => false,
        }
    }

    pub fn refill(&mut self) {
        *self = Self::new(self.kind);
    }
}

/// Everything a player carries. The knife is always held; at most one
/// weapon per other slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    primary: Option<WeaponSlot>,
    secondary: Option<WeaponSlot>,
    melee: WeaponSlot,
    grenade: Option<WeaponSlot>,
    active: Slot,
}

impl Inventory {
    /// Knife plus `pistol`, with the pistol drawn
    pub fn new(pistol: WeaponKind) -> Self {
        let mut inventory = Self {
            primary: None,
            secondary: None,
            melee: WeaponSlot::new(WeaponKind::Knife),
            grenade: None,
            active: Slot::Melee,
        };
        inventory.give(pistol);
        inventory
    }

    fn slot_mut(&mut self, slot: Slot) -> Option<&mut WeaponSlot> {
        match slot {
            Slot::Primary => self.primary.as_mut(),
            Slot::Secondary => self.secondary.as_mut(),
            Slot::Melee => Some(&mut self.melee),
            Slot::Grenade => self.grenade.as_mut(),
        }
    }

    pub fn slot(&self, slot: Slot) -> Option<&WeaponSlot> {
        match slot {
            Slot::Primary => self.primary.as_ref(),
            Slot::Secondary => self.secondary.as_ref(),
            Slot::Melee => Some(&self.melee),
            Slot::Grenade => self.grenade.as_ref(),
        }
    }

    pub fn active_slot(&self) -> Slot {
        self.active
    }

    /// The drawn weapon
    pub fn active(&self) -> &WeaponSlot {
        self.slot(self.active).unwrap_or(&self.melee)
    }

    pub fn active_mut(&mut self) -> &mut WeaponSlot {
        let held = match self.active {
            Slot::Primary => self.primary.as_mut(),
            Slot::Secondary => self.secondary.as_mut(),
            Slot::Grenade => self.grenade.as_mut(),
            Slot::Melee => None,
        };
        match held {
            Some(weapon) => weapon,
            None => &mut self.melee,
        }
    }

    pub fn has(&self, kind: WeaponKind) -> bool {
        self.slot(kind.slot()).is_some_and(|w| w.kind == kind)
    }

    /// Kinds carried, in slot order
    pub fn kinds(&self) -> Vec<WeaponKind> {
        [Slot::Primary, Slot::Secondary, Slot::Melee, Slot::Grenade]
            .into_iter()
            .filter_map(|slot| self.slot(slot).map(|w| w.kind))
            .collect()
    }

    /// Put a fresh `kind` into its slot and draw it; returns what it replaced
    pub fn give(&mut self, kind: WeaponKind) -> Option<WeaponSlot> {
        let slot = kind.slot();
        let replaced = match slot {
            Slot::Primary => self.primary.replace(WeaponSlot::new(kind)),
            Slot::Secondary => self.secondary.replace(WeaponSlot::new(kind)),
            Slot::Grenade => self.grenade.replace(WeaponSlot::new(kind)),
            Slot::Melee => None,
        };
        self.active = slot;
        replaced
    }

    /// Draw the weapon in `slot`; an in-progress reload is abandoned
    pub fn switch(&mut self, slot: Slot) -> bool {
        if slot == self.active || self.slot(slot).is_none() {
            return false;
        }
        self.active_mut().reload_done_tick = None;
        self.active = slot;
        true
    }

    /// Remove the drawn weapon (a thrown grenade) and draw the best remaining one
    pub fn discard_active(&mut self) -> Option<WeaponSlot> {
        let removed = match self.active {
            Slot::Primary => self.primary.take(),
            Slot::Secondary => self.secondary.take(),
            Slot::Grenade => self.grenade.take(),
            Slot::Melee => None,
        };
        self.active = [Slot::Primary, Slot::Secondary]
            .into_iter()
            .find(|slot| self.slot(*slot).is_some())
            .unwrap_or(Slot::Melee);
        removed
    }

    /// Round start: top up every carried weapon
    pub fn refill(&mut self) {
        for slot in [Slot::Primary, Slot::Secondary, Slot::Melee, Slot::Grenade] {
            if let Some(weapon) = self.slot_mut(slot) {
                weapon.refill();
            }
        }
    }

    /// A dead player's loadout: everything but the knife and a fresh `pistol`
    pub fn strip(&mut self, pistol: WeaponKind) {
        *self = Self::new(pistol);
    }

    /// Advance the drawn weapon's reload
    pub fn update_reload(&mut self, now_tick: u64) -> bool {
        self.active_mut().update_reload(now_tick)
    }
}

/// Result of running raw damage through headshot and armor rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageOutcome {
    pub health_damage: f32,
    pub armor_damage: f32,
}

/// Headshot multiplier first, then armor: while any armor remains half the
/// damage reaches health and armor loses half of the absorbed share.
pub fn mitigate(raw_damage: f32, headshot: bool, armor: f32) -> DamageOutcome {
    let damage = if headshot {
        raw_damage * HEADSHOT_MULTIPLIER
    } else {
        raw_damage
    }
    .max(0.0);

    if armor <= 0.0 {
        return DamageOutcome {
            health_damage: damage,
            armor_damage: 0.0,
        };
    }

    let health_damage = damage * ARMOR_HEALTH_RATIO;
    let absorbed = damage - health_damage;
    DamageOutcome {
        health_damage,
        armor_damage: (absorbed / 2.0).min(armor),
    }
}
