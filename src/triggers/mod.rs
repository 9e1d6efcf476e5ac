//! Recurrence rules for scheduled jobs.
//!
//! A [`Trigger`] produces a sequence of fire times and owns its own
//! serialization format, so trigger bodies can live in the `trigger` table
//! as opaque strings. Concrete types are reconstructed from those strings
//! through a [`TriggerRegistry`] keyed by type tag; additional trigger
//! types can be registered under fresh tags.

mod cron;

pub use cron::CronTrigger;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const RUN_ONCE_TRIGGER_TYPE: &str = "run-once";
pub const REPEAT_TRIGGER_TYPE: &str = "repeat";
pub const CRON_TRIGGER_TYPE: &str = "cron";

/// A serializable recurrence rule.
pub trait Trigger: Send + Sync {
    /// Constant tag identifying the trigger type in the registry and in
    /// persisted rows.
    fn trigger_type(&self) -> &'static str;

    /// Returns the next time at which the trigger is scheduled to fire,
    /// strictly after `prev`, or an error when the trigger is exhausted.
    fn next_fire_time(&mut self, prev: DateTime<Utc>) -> Result<DateTime<Utc>>;

    /// Serializes the trigger body; the format is owned by the type.
    fn serialize(&self) -> Result<String>;
}

type DeserializeFn = Box<dyn Fn(&str) -> Result<Box<dyn Trigger>> + Send + Sync>;

/// Maps trigger type tags to deserializers.
///
/// The built-in types are pre-registered; registration is last-wins so a
/// custom implementation may shadow a built-in tag if it must.
pub struct TriggerRegistry {
    deserializers: HashMap<String, DeserializeFn>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            deserializers: HashMap::new(),
        };
        registry.register(RUN_ONCE_TRIGGER_TYPE, |data| {
            let trigger: RunOnceTrigger = serde_json::from_str(data)?;
            Ok(Box::new(trigger) as Box<dyn Trigger>)
        });
        registry.register(REPEAT_TRIGGER_TYPE, |data| {
            let trigger: RepeatTrigger = serde_json::from_str(data)?;
            Ok(Box::new(trigger) as Box<dyn Trigger>)
        });
        registry.register(CRON_TRIGGER_TYPE, cron::deserialize);
        registry
    }

    /// Registers a deserializer for a trigger type tag.
    pub fn register<F>(&mut self, trigger_type: impl Into<String>, deserializer: F)
    where
        F: Fn(&str) -> Result<Box<dyn Trigger>> + Send + Sync + 'static,
    {
        self.deserializers
            .insert(trigger_type.into(), Box::new(deserializer));
    }

    /// Reconstructs a trigger from its type tag and serialized body.
    pub fn load(&self, trigger_type: &str, data: &str) -> Result<Box<dyn Trigger>> {
        let deserializer =
            self.deserializers
                .get(trigger_type)
                .ok_or_else(|| Error::InvalidTriggerType {
                    trigger_type: trigger_type.to_string(),
                })?;
        deserializer(data)
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A trigger that fires exactly once, `delay` after the previous time.
///
/// By policy run-once triggers are never persisted; the job row they
/// produce carries no trigger id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOnceTrigger {
    pub delay: Duration,
    #[serde(default)]
    expired: bool,
}

impl RunOnceTrigger {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            expired: false,
        }
    }
}

impl Trigger for RunOnceTrigger {
    fn trigger_type(&self) -> &'static str {
        RUN_ONCE_TRIGGER_TYPE
    }

    fn next_fire_time(&mut self, prev: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.expired {
            return Err(Error::TriggerExpired(
                "run-once trigger has already fired".to_string(),
            ));
        }
        self.expired = true;
        Ok(prev + to_chrono_duration(self.delay)?)
    }

    fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }
}

/// A trigger that fires every `interval`, without end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatTrigger {
    pub interval: Duration,
}

impl RepeatTrigger {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Trigger for RepeatTrigger {
    fn trigger_type(&self) -> &'static str {
        REPEAT_TRIGGER_TYPE
    }

    fn next_fire_time(&mut self, prev: DateTime<Utc>) -> Result<DateTime<Utc>> {
        Ok(prev + to_chrono_duration(self.interval)?)
    }

    fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }
}

fn to_chrono_duration(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|_| Error::validation(format!("duration out of range: {duration:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 4, 15, h, m, s).unwrap()
    }

    #[test]
    fn run_once_fires_once_then_expires() {
        let mut trigger = RunOnceTrigger::new(Duration::from_secs(30));

        let first = trigger.next_fire_time(at(18, 0, 0)).unwrap();
        assert_eq!(first, at(18, 0, 30));

        let second = trigger.next_fire_time(first);
        assert!(matches!(second, Err(Error::TriggerExpired(_))));
    }

    #[test]
    fn repeat_never_expires() {
        let mut trigger = RepeatTrigger::new(Duration::from_secs(2));

        let mut prev = at(18, 0, 0);
        for i in 1..=5 {
            prev = trigger.next_fire_time(prev).unwrap();
            assert_eq!(prev, at(18, 0, 2 * i));
        }
    }

    #[test]
    fn run_once_round_trips_through_the_registry() {
        let registry = TriggerRegistry::new();
        let trigger = RunOnceTrigger::new(Duration::from_millis(1500));

        let data = Trigger::serialize(&trigger).unwrap();
        let mut restored = registry.load(RUN_ONCE_TRIGGER_TYPE, &data).unwrap();

        assert_eq!(restored.trigger_type(), RUN_ONCE_TRIGGER_TYPE);
        assert_eq!(
            restored.next_fire_time(at(12, 0, 0)).unwrap(),
            Utc.with_ymd_and_hms(2019, 4, 15, 12, 0, 1).unwrap()
                + chrono::Duration::milliseconds(500)
        );
    }

    #[test]
    fn repeat_round_trips_through_the_registry() {
        let registry = TriggerRegistry::new();
        let trigger = RepeatTrigger::new(Duration::from_secs(90));

        let data = Trigger::serialize(&trigger).unwrap();
        let mut restored = registry.load(REPEAT_TRIGGER_TYPE, &data).unwrap();

        assert_eq!(restored.trigger_type(), REPEAT_TRIGGER_TYPE);
        assert_eq!(
            restored.next_fire_time(at(12, 0, 0)).unwrap(),
            at(12, 1, 30)
        );
    }

    #[test]
    fn unknown_trigger_type_is_rejected() {
        let registry = TriggerRegistry::new();
        let result = registry.load("lunar-phase", "{}");
        assert!(matches!(result, Err(Error::InvalidTriggerType { .. })));
    }

    #[test]
    fn custom_trigger_types_can_be_registered() {
        let mut registry = TriggerRegistry::new();
        registry.register("every-minute", |_| {
            Ok(Box::new(RepeatTrigger::new(Duration::from_secs(60))) as Box<dyn Trigger>)
        });

        let mut trigger = registry.load("every-minute", "").unwrap();
        assert_eq!(
            trigger.next_fire_time(at(12, 0, 0)).unwrap(),
            at(12, 1, 0)
        );
    }
}
