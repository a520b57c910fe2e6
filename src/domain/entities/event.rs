//! Event categories and handler types

use crate::application::errors::ExtensionFault;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Lower executes first
pub type HandlerPriority = i32;

/// Priority used for hooks that do not declare one
pub const DEFAULT_HANDLER_PRIORITY: HandlerPriority = 50;

/// Every event kind the host recognizes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    GameStart,
    GameEnd,
    GameLoad,
    GameSave,
    PlayerCreate,
    PlayerLevelUp,
    PlayerDeath,
    PlayerRespawn,
    CombatStart,
    CombatEnd,
    CombatTurn,
    EnemyKilled,
    ItemPickup,
    ItemDrop,
    ItemUse,
    ItemEquip,
    ItemUnequip,
    QuestStart,
    QuestComplete,
    QuestFail,
    LocationEnter,
    LocationExit,
    NpcInteract,
    DialogueChoice,
    ShopOpen,
    ShopBuy,
    ShopSell,
    CraftSuccess,
    CraftFail,
    SkillUse,
    SkillLearn,
    SpellCast,
    EffectApply,
    EffectRemove,
    TimeChange,
    WeatherChange,
    AchievementUnlock,
    ExtensionLoad,
    ExtensionUnload,
    /// Extension-defined event, identified by name
    Custom(String),
}

const NAMED_CATEGORIES: &[(&str, EventCategory)] = &[
    ("game_start", EventCategory::GameStart),
    ("game_end", EventCategory::GameEnd),
    ("game_load", EventCategory::GameLoad),
    ("game_save", EventCategory::GameSave),
    ("player_create", EventCategory::PlayerCreate),
    ("player_level_up", EventCategory::PlayerLevelUp),
    ("player_death", EventCategory::PlayerDeath),
    ("player_respawn", EventCategory::PlayerRespawn),
    ("combat_start", EventCategory::CombatStart),
    ("combat_end", EventCategory::CombatEnd),
    ("combat_turn", EventCategory::CombatTurn),
    ("enemy_killed", EventCategory::EnemyKilled),
    ("item_pickup", EventCategory::ItemPickup),
    ("item_drop", EventCategory::ItemDrop),
    ("item_use", EventCategory::ItemUse),
    ("item_equip", EventCategory::ItemEquip),
    ("item_unequip", EventCategory::ItemUnequip),
    ("quest_start", EventCategory::QuestStart),
    ("quest_complete", EventCategory::QuestComplete),
    ("quest_fail", EventCategory::QuestFail),
    ("location_enter", EventCategory::LocationEnter),
    ("location_exit", EventCategory::LocationExit),
    ("npc_interact", EventCategory::NpcInteract),
    ("dialogue_choice", EventCategory::DialogueChoice),
    ("shop_open", EventCategory::ShopOpen),
    ("shop_buy", EventCategory::ShopBuy),
    ("shop_sell", EventCategory::ShopSell),
    ("craft_success", EventCategory::CraftSuccess),
    ("craft_fail", EventCategory::CraftFail),
    ("skill_use", EventCategory::SkillUse),
    ("skill_learn", EventCategory::SkillLearn),
    ("spell_cast", EventCategory::SpellCast),
    ("effect_apply", EventCategory::EffectApply),
    ("effect_remove", EventCategory::EffectRemove),
    ("time_change", EventCategory::TimeChange),
    ("weather_change", EventCategory::WeatherChange),
    ("achievement_unlock", EventCategory::AchievementUnlock),
    ("extension_load", EventCategory::ExtensionLoad),
    ("extension_unload", EventCategory::ExtensionUnload),
];

impl EventCategory {
    pub fn as_str(&self) -> &str {
        if let EventCategory::Custom(name) = self {
            return name;
        }
        NAMED_CATEGORIES
            .iter()
            .find(|(_, category)| category == self)
            .map(|(name, _)| *name)
            .unwrap_or("custom")
    }
}

impl FromStr for EventCategory {
    type Err = std::convert::Infallible;

    /// Unknown names become `Custom` events
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Ok(NAMED_CATEGORIES
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, category)| category.clone())
            .unwrap_or(EventCategory::Custom(s.trim().to_string())))
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCategory::Custom(name) => write!(f, "custom:{}", name),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Whether dispatch continues after a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

/// What a handler hands back to the bus
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerReply {
    pub value: Value,
    pub propagation: Propagation,
}

impl HandlerReply {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            propagation: Propagation::Continue,
        }
    }

    pub fn none() -> Self {
        Self::value(Value::Null)
    }

    /// Record a value and skip the remaining handlers of this publish
    pub fn stop(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            propagation: Propagation::Stop,
        }
    }
}

/// Event handler function type
pub type EventHandler = Arc<dyn Fn(&Value) -> Result<HandlerReply, ExtensionFault> + Send + Sync>;

/// Pre-filter deciding whether a handler sees a payload
pub type EventFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Identifies a single subscription; also its registration sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

/// Result slot for one handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub handle: SubscriptionHandle,
    pub owner: String,
    pub outcome: Result<Value, ExtensionFault>,
}

impl DispatchResult {
    pub fn is_fault(&self) -> bool {
        self.outcome.is_err()
    }
}

/// A hook contributed by an extension's `register_hooks`
#[derive(Clone)]
pub struct HookSpec {
    pub category: EventCategory,
    pub handler: EventHandler,
    pub priority: HandlerPriority,
    pub once: bool,
    pub filter: Option<EventFilter>,
}

impl HookSpec {
    pub fn new<F>(category: EventCategory, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<HandlerReply, ExtensionFault> + Send + Sync + 'static,
    {
        Self {
            category,
            handler: Arc::new(handler),
            priority: DEFAULT_HANDLER_PRIORITY,
            once: false,
            filter: None,
        }
    }

    pub fn with_priority(mut self, priority: HandlerPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSpec")
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("once", &self.once)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parsing() {
        assert_eq!("combat_end".parse::<EventCategory>().unwrap(), EventCategory::CombatEnd);
        assert_eq!("COMBAT_END".parse::<EventCategory>().unwrap(), EventCategory::CombatEnd);
        assert_eq!(
            "dragon_slain".parse::<EventCategory>().unwrap(),
            EventCategory::Custom("dragon_slain".into())
        );
    }

    #[test]
    fn test_category_names() {
        assert_eq!(EventCategory::PlayerLevelUp.as_str(), "player_level_up");
        assert_eq!(EventCategory::Custom("x".into()).to_string(), "custom:x");
        for (name, category) in NAMED_CATEGORIES {
            assert_eq!(category.as_str(), *name);
        }
    }
}
