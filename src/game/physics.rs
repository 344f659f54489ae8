//! Rigid body physics: integration, collision detection and impulse resolution

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::math::Vec2;
use super::spatial::SpatialHash;

/// Stable handle to a body owned by a [`PhysicsWorld`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u32);

/// Collision shape. Positions always refer to the shape's centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Collider {
    Circle { radius: f32 },
    Rectangle { width: f32, height: f32 },
}

impl Collider {
    fn is_degenerate(&self) -> bool {
        match *self {
            Collider::Circle { radius } => !(radius.is_finite() && radius > 0.0),
            Collider::Rectangle { width, height } => {
                !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0)
            }
        }
    }
}

/// A simulated body
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    pub id: BodyId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub acceleration: Vec2,
    pub mass: f32,
    /// Linear damping coefficient (per second)
    pub friction: f32,
    pub restitution: f32,
    pub is_static: bool,
    /// Disabled bodies are skipped by integration, collision and raycasts
    pub enabled: bool,
    pub collider: Collider,
}

impl RigidBody {
    /// A movable body; the id is assigned by [`PhysicsWorld::add_body`]
    pub fn dynamic(collider: Collider, position: Vec2, mass: f32) -> Self {
        Self {
            id: BodyId(0),
            position,
            velocity: Vec2::ZERO,
            acceleration: Vec2::ZERO,
            mass,
            friction: 0.0,
            restitution: 0.0,
            is_static: false,
            enabled: true,
            collider,
        }
    }

    /// An immovable body (infinite mass)
    pub fn fixed(collider: Collider, position: Vec2) -> Self {
        Self {
            is_static: true,
            mass: 0.0,
            ..Self::dynamic(collider, position, 0.0)
        }
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn inverse_mass(&self) -> f32 {
        if self.is_static || self.mass <= 0.0 {
            0.0
        } else {
            1.0 / self.mass
        }
    }

    fn degenerate_reason(&self) -> Option<&'static str> {
        if !self.position.is_finite() {
            Some("non-finite position")
        } else if !self.velocity.is_finite() || !self.acceleration.is_finite() {
            Some("non-finite velocity")
        } else if self.collider.is_degenerate() {
            Some("non-positive collider size")
        } else if !self.is_static && !(self.mass.is_finite() && self.mass > 0.0) {
            Some("non-positive mass on dynamic body")
        } else {
            None
        }
    }

    /// Axis-aligned bounds as (min, max)
    pub fn bounds(&self) -> (Vec2, Vec2) {
        let half = match self.collider {
            Collider::Circle { radius } => Vec2::new(radius, radius),
            Collider::Rectangle { width, height } => Vec2::new(width / 2.0, height / 2.0),
        };
        (self.position - half, self.position + half)
    }
}

/// World-wide physics tunables
#[derive(Debug, Clone, Copy)]
pub struct PhysicsConfig {
    /// Uniform acceleration applied to dynamic bodies (zero for a top-down arena)
    pub gravity: Vec2,
    /// Broad phase cell edge length
    pub cell_size: f32,
    /// Fraction of penetration removed per step
    pub correction_percent: f32,
    /// Penetration allowed before positional correction kicks in
    pub correction_slop: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::ZERO,
            cell_size: 100.0,
            correction_percent: 0.8,
            correction_slop: 0.01,
        }
    }
}

/// Narrow phase result for a pair of overlapping bodies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub a: BodyId,
    pub b: BodyId,
    /// Unit normal pointing from `a` to `b`; `None` when the centres coincide
    pub normal: Option<Vec2>,
    pub penetration: f32,
}

/// Outcome of one integration step
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub contacts: Vec<Contact>,
    /// Bodies skipped this step because of invalid geometry
    pub excluded: Vec<BodyId>,
}

/// Nearest body struck by a ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub body: BodyId,
    pub point: Vec2,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhysicsError {
    #[error("ray direction must be finite and non-zero")]
    ZeroDirection,

    #[error("ray origin is not finite")]
    NonFiniteOrigin,
}

/// Owns every rigid body of one room
#[derive(Debug, Clone)]
pub struct PhysicsWorld {
    config: PhysicsConfig,
    bodies: BTreeMap<BodyId, RigidBody>,
    next_id: u32,
    grid: SpatialHash,
}

impl PhysicsWorld {
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            grid: SpatialHash::new(config.cell_size),
            config,
            bodies: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn add_body(&mut self, mut body: RigidBody) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        body.id = id;
        self.bodies.insert(id, body);
        id
    }

    pub fn remove_body(&mut self, id: BodyId) -> Option<RigidBody> {
        self.bodies.remove(&id)
    }

    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(&id)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        self.bodies.get_mut(&id)
    }

    pub fn bodies(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.values()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn set_enabled(&mut self, id: BodyId, enabled: bool) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.enabled = enabled;
            if !enabled {
                body.velocity = Vec2::ZERO;
            }
        }
    }

    /// Advance every enabled dynamic body by `dt` seconds, then detect and
    /// resolve collisions.
    pub fn integrate(&mut self, dt: f32) -> StepReport {
        let mut report = StepReport::default();
        let gravity = self.config.gravity;

        for body in self.bodies.values_mut() {
            if !body.enabled {
                continue;
            }
            if let Some(reason) = body.degenerate_reason() {
                warn!(body_id = body.id.0, reason, "Excluding degenerate body from step");
                report.excluded.push(body.id);
                continue;
            }
            if body.is_static {
                continue;
            }

            body.velocity += (body.acceleration + gravity) * dt;
            let damping = (1.0 - body.friction * dt).max(0.0);
            body.velocity = body.velocity * damping;
            body.position += body.velocity * dt;
        }

        self.grid.clear();
        for body in self.bodies.values() {
            if body.enabled && !report.excluded.contains(&body.id) {
                self.grid.insert(body.id, body.position);
            }
        }

        for (a, b) in self.grid.candidate_pairs() {
            let (Some(body_a), Some(body_b)) = (self.bodies.get(&a), self.bodies.get(&b)) else {
                continue;
            };
            if body_a.is_static && body_b.is_static {
                continue;
            }
            if let Some(contact) = Self::detect_collision(body_a, body_b) {
                self.resolve_contact(&contact);
                report.contacts.push(contact);
            }
        }

        report
    }

    /// Narrow phase test between two bodies
    pub fn detect_collision(a: &RigidBody, b: &RigidBody) -> Option<Contact> {
        let (normal, penetration) = match (a.collider, b.collider) {
            (Collider::Circle { radius: ra }, Collider::Circle { radius: rb }) => {
                let delta = b.position - a.position;
                let distance = delta.length();
                let reach = ra + rb;
                if distance >= reach {
                    return None;
                }
                (delta.normalized(), reach - distance)
            }
            (
                Collider::Rectangle { width: wa, height: ha },
                Collider::Rectangle { width: wb, height: hb },
            ) => {
                let delta = b.position - a.position;
                let overlap_x = (wa + wb) / 2.0 - delta.x.abs();
                let overlap_y = (ha + hb) / 2.0 - delta.y.abs();
                if overlap_x <= 0.0 || overlap_y <= 0.0 {
                    return None;
                }
                let normal = if delta == Vec2::ZERO {
                    None
                } else if overlap_x < overlap_y {
                    Some(Vec2::new(delta.x.signum(), 0.0))
                } else {
                    Some(Vec2::new(0.0, delta.y.signum()))
                };
                (normal, overlap_x.min(overlap_y))
            }
            (Collider::Circle { radius }, Collider::Rectangle { width, height }) => {
                let (normal, penetration) =
                    circle_rect(a.position, radius, b.position, width, height)?;
                // circle_rect points from the rectangle to the circle
                (normal.map(|n| -n), penetration)
            }
            (Collider::Rectangle { width, height }, Collider::Circle { radius }) => {
                circle_rect(b.position, radius, a.position, width, height)?
            }
        };

        Some(Contact {
            a: a.id,
            b: b.id,
            normal,
            penetration,
        })
    }

    fn resolve_contact(&mut self, contact: &Contact) {
        let Some(normal) = contact.normal else {
            return;
        };
        let (Some(mut a), Some(mut b)) = (
            self.bodies.get(&contact.a).cloned(),
            self.bodies.get(&contact.b).cloned(),
        ) else {
            return;
        };

        let inv_a = a.inverse_mass();
        let inv_b = b.inverse_mass();
        let inv_sum = inv_a + inv_b;
        if inv_sum <= 0.0 {
            return;
        }

        let velocity_along_normal = (b.velocity - a.velocity).dot(normal);
        // already separating: the next step opens the overlap on its own
        if velocity_along_normal > 0.0 {
            return;
        }

        let restitution = a.restitution.min(b.restitution);
        let j = -(1.0 + restitution) * velocity_along_normal / inv_sum;
        let impulse = normal * j;
        a.velocity -= impulse * inv_a;
        b.velocity += impulse * inv_b;

        let depth = (contact.penetration - self.config.correction_slop).max(0.0);
        let correction = normal * (depth / inv_sum * self.config.correction_percent);
        a.position -= correction * inv_a;
        b.position += correction * inv_b;

        self.bodies.insert(a.id, a);
        self.bodies.insert(b.id, b);
    }

    /// Nearest enabled body along a ray
    pub fn raycast(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
    ) -> Result<Option<RayHit>, PhysicsError> {
        self.raycast_filtered(origin, direction, max_distance, |_| true)
    }

    /// Like [`raycast`](Self::raycast), only considering bodies accepted by `filter`
    pub fn raycast_filtered<F>(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
        filter: F,
    ) -> Result<Option<RayHit>, PhysicsError>
    where
        F: Fn(&RigidBody) -> bool,
    {
        if !origin.is_finite() {
            return Err(PhysicsError::NonFiniteOrigin);
        }
        let dir = direction.normalized().ok_or(PhysicsError::ZeroDirection)?;

        let mut nearest: Option<RayHit> = None;
        for body in self.bodies.values() {
            if !body.enabled || body.degenerate_reason().is_some() || !filter(body) {
                continue;
            }

            let distance = match body.collider {
                Collider::Circle { radius } => ray_circle(origin, dir, body.position, radius),
                Collider::Rectangle { .. } => {
                    let (min, max) = body.bounds();
                    ray_aabb(origin, dir, min, max)
                }
            };

            if let Some(distance) = distance {
                let closer = nearest.map_or(true, |hit| distance < hit.distance);
                if distance <= max_distance && closer {
                    nearest = Some(RayHit {
                        body: body.id,
                        point: origin + dir * distance,
                        distance,
                    });
                }
            }
        }

        Ok(nearest)
    }

    /// Radial impulse falling off linearly to zero at `radius`
    pub fn apply_explosion_force(&mut self, center: Vec2, radius: f32, force: f32) -> Vec<BodyId> {
        let mut affected = Vec::new();
        for body in self.bodies.values_mut() {
            if body.is_static || !body.enabled || body.degenerate_reason().is_some() {
                continue;
            }
            let offset = body.position - center;
            let distance = offset.length();
            if distance > 0.0 && distance < radius {
                let magnitude = force * (1.0 - distance / radius) / body.mass;
                body.velocity += offset * (magnitude / distance);
                affected.push(body.id);
            }
        }
        affected
    }
}

/// Circle against axis-aligned rectangle. Normal points from rectangle to circle.
fn circle_rect(
    circle: Vec2,
    radius: f32,
    rect: Vec2,
    width: f32,
    height: f32,
) -> Option<(Option<Vec2>, f32)> {
    let half = Vec2::new(width / 2.0, height / 2.0);
    let closest = circle.clamp(rect - half, rect + half);
    let delta = circle - closest;
    let distance_sq = delta.length_squared();
    if distance_sq >= radius * radius {
        return None;
    }

    if distance_sq > 0.0 {
        let distance = distance_sq.sqrt();
        return Some((delta.normalized(), radius - distance));
    }

    // Centre inside the rectangle: push out along the shallowest axis
    let offset = circle - rect;
    let depth_x = half.x - offset.x.abs();
    let depth_y = half.y - offset.y.abs();
    if offset == Vec2::ZERO {
        return Some((None, radius + depth_x.min(depth_y)));
    }
    if depth_x < depth_y {
        Some((Some(Vec2::new(offset.x.signum(), 0.0)), radius + depth_x))
    } else {
        Some((Some(Vec2::new(0.0, offset.y.signum())), radius + depth_y))
    }
}

/// Distance along a unit ray to a circle, 0 if the origin is inside
fn ray_circle(origin: Vec2, dir: Vec2, center: Vec2, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let c = oc.length_squared() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let b = oc.dot(dir);
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let t = -b - discriminant.sqrt();
    (t >= 0.0).then_some(t)
}

/// Slab test against an AABB, 0 if the origin is inside
fn ray_aabb(origin: Vec2, dir: Vec2, min: Vec2, max: Vec2) -> Option<f32> {
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;

    for (o, d, lo, hi) in [(origin.x, dir.x, min.x, max.x), (origin.y, dir.y, min.y, max.y)] {
        if d.abs() < f32::EPSILON {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let t1 = (lo - o) / d;
        let t2 = (hi - o) / d;
        t_min = t_min.max(t1.min(t2));
        t_max = t_max.min(t1.max(t2));
    }

    if t_max < t_min.max(0.0) {
        return None;
    }
    Some(t_min.max(0.0))
}
