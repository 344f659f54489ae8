//! Thrown HE grenades: flight, wall bounces and fuse

use super::map::GameMap;
use super::math::Vec2;
use super::PlayerId;

/// Launch speed in px/s
pub const THROW_SPEED: f32 = 500.0;
/// Fraction of speed lost per second of rolling
pub const GRENADE_DRAG: f32 = 1.5;
/// Speed kept after hitting a wall
pub const BOUNCE_DAMPING: f32 = 0.6;
pub const FUSE_SECS: f32 = 1.5;
/// Impulse at the centre of the blast
pub const BLAST_FORCE: f32 = 400.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Grenade {
    pub owner: PlayerId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub detonate_tick: u64,
}

impl Grenade {
    pub fn thrown(owner: PlayerId, origin: Vec2, aim: f32, detonate_tick: u64) -> Self {
        Self {
            owner,
            position: origin,
            velocity: Vec2::from_angle(aim) * THROW_SPEED,
            detonate_tick,
        }
    }

    /// Move one step, reflecting off whichever axis runs into a wall
    pub fn advance(&mut self, map: &GameMap, dt: f32) {
        let next = self.position + self.velocity * dt;
        if map.is_walkable(next) {
            self.position = next;
        } else {
            if !map.is_walkable(Vec2::new(next.x, self.position.y)) {
                self.velocity.x = -self.velocity.x;
            }
            if !map.is_walkable(Vec2::new(self.position.x, next.y)) {
                self.velocity.y = -self.velocity.y;
            }
            self.velocity = self.velocity * BOUNCE_DAMPING;
        }
        self.velocity = self.velocity * (1.0 - GRENADE_DRAG * dt).max(0.0);
    }

    pub fn is_due(&self, now: u64) -> bool {
        now >= self.detonate_tick
    }
}
