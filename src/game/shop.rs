//! Buy menu: prices, team restrictions and purchase validation

use serde::{Deserialize, Serialize};

use super::combat::{WeaponKind, MAX_ARMOR};
use super::Team;

pub const KEVLAR_PRICE: u32 = 650;
pub const KEVLAR_HELMET_PRICE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    /// Body armor topped up by 100
    Kevlar,
    /// Full armor
    KevlarHelmet,
}

/// Anything on the buy menu, named on the wire by its snake_case id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShopItem {
    Weapon(WeaponKind),
    Equipment(Equipment),
}

impl ShopItem {
    pub fn price(self) -> u32 {
        match self {
            ShopItem::Weapon(kind) => kind.stats().price,
            ShopItem::Equipment(Equipment::Kevlar) => KEVLAR_PRICE,
            ShopItem::Equipment(Equipment::KevlarHelmet) => KEVLAR_HELMET_PRICE,
        }
    }

    /// The knife is never sold
    pub fn available_to(self, team: Team) -> bool {
        match self {
            ShopItem::Weapon(WeaponKind::Knife) => false,
            ShopItem::Weapon(kind) => kind.available_to(team),
            ShopItem::Equipment(_) => true,
        }
    }

    /// Armor after buying this item, or `None` if it is not armor
    pub fn armor_after(self, armor: f32) -> Option<f32> {
        match self {
            ShopItem::Equipment(Equipment::Kevlar) => Some((armor + 100.0).min(MAX_ARMOR)),
            ShopItem::Equipment(Equipment::KevlarHelmet) => Some(MAX_ARMOR),
            ShopItem::Weapon(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BuyError {
    #[error("unknown player")]
    UnknownPlayer,

    #[error("dead players cannot buy")]
    Dead,

    #[error("buy time is over")]
    BuyTimeOver,

    #[error("not inside a buy zone")]
    OutsideBuyZone,

    #[error("not sold to this team")]
    NotAvailable,

    #[error("not enough money")]
    InsufficientFunds,

    #[error("already carried")]
    AlreadyOwned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_parse_from_their_ids() {
        let rifle: ShopItem = serde_json::from_str(r#""ak47""#).unwrap();
        assert_eq!(rifle, ShopItem::Weapon(WeaponKind::Ak47));
        let armor: ShopItem = serde_json::from_str(r#""kevlar_helmet""#).unwrap();
        assert_eq!(armor, ShopItem::Equipment(Equipment::KevlarHelmet));
        assert!(serde_json::from_str::<ShopItem>(r#""railgun""#).is_err());
    }

    #[test]
    fn prices_follow_the_menu() {
        assert_eq!(ShopItem::Weapon(WeaponKind::Awp).price(), 4750);
        assert_eq!(ShopItem::Weapon(WeaponKind::HeGrenade).price(), 300);
        assert_eq!(ShopItem::Equipment(Equipment::Kevlar).price(), 650);
    }

    #[test]
    fn knife_and_enemy_rifles_are_not_for_sale() {
        assert!(!ShopItem::Weapon(WeaponKind::Knife).available_to(Team::Ct));
        assert!(!ShopItem::Weapon(WeaponKind::M4a4).available_to(Team::T));
        assert!(ShopItem::Equipment(Equipment::Kevlar).available_to(Team::T));
    }

    #[test]
    fn kevlar_tops_up_and_helmet_fills() {
        let kevlar = ShopItem::Equipment(Equipment::Kevlar);
        assert_eq!(kevlar.armor_after(40.0), Some(100.0));
        assert_eq!(ShopItem::Equipment(Equipment::KevlarHelmet).armor_after(0.0), Some(100.0));
        assert_eq!(ShopItem::Weapon(WeaponKind::Mp5).armor_after(0.0), None);
    }
}
