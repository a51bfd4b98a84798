//! Bot identity synthesis from a requested count.

use crate::core::{BotIdentity, SchedulerError};

const NAMES: &[&str] = &[
    "Alex", "Blair", "Casey", "Dana", "Emery", "Finley", "Gray", "Harper", "Indy", "Jordan",
    "Kai", "Logan", "Morgan", "Noel", "Oakley", "Parker", "Quinn", "Reese", "Sage", "Taylor",
];

/// Produces new bot identities.
pub trait BotIdentitySynthesizer: Send + Sync {
    /// Generate `count` identities whose ids are all greater than any id in `existing`.
    ///
    /// # Errors
    ///
    /// `Validation` when the new ids would not fit in a `u64`.
    fn generate(&self, count: usize, existing: &[BotIdentity]) -> Result<Vec<BotIdentity>, SchedulerError>;
}

/// Names drawn from a fixed list, suffixed once the list wraps.
#[derive(Debug, Clone, Default)]
pub struct NameListSynthesizer {
    prefix: Option<String>,
}

impl NameListSynthesizer {
    /// Synthesizer prepending `prefix` to every name.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl BotIdentitySynthesizer for NameListSynthesizer {
    fn generate(&self, count: usize, existing: &[BotIdentity]) -> Result<Vec<BotIdentity>, SchedulerError> {
        let highest = existing.iter().map(|b| b.id).max().unwrap_or(0);
        let exhausted = || SchedulerError::Validation(format!("no room for {count} bot ids after {highest}"));
        if count == 0 {
            return Ok(Vec::new());
        }
        let start = highest.checked_add(1).ok_or_else(exhausted)?;
        let last = u64::try_from(count - 1)
            .ok()
            .and_then(|span| start.checked_add(span))
            .ok_or_else(exhausted)?;
        let bots: Vec<BotIdentity> = (start..=last)
            .enumerate()
            .map(|(offset, id)| {
                let base = NAMES[offset % NAMES.len()];
                let round = offset / NAMES.len();
                let name = match (&self.prefix, round) {
                    (Some(prefix), 0) => format!("{prefix} {base}"),
                    (Some(prefix), n) => format!("{prefix} {base} {}", n + 1),
                    (None, 0) => base.to_owned(),
                    (None, n) => format!("{base} {}", n + 1),
                };
                BotIdentity::new(id, name)
            })
            .collect();
        Ok(bots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_continue_after_existing_maximum() {
        let existing = vec![BotIdentity::new(3, "a"), BotIdentity::new(9, "b")];
        let bots = NameListSynthesizer::default().generate(3, &existing).unwrap();
        assert_eq!(bots.iter().map(|b| b.id).collect::<Vec<_>>(), vec![10, 11, 12]);
    }

    #[test]
    fn names_wrap_with_suffix() {
        let bots = NameListSynthesizer::default().generate(NAMES.len() + 1, &[]).unwrap();
        assert_eq!(bots[0].name, "Alex");
        assert_eq!(bots[NAMES.len()].name, "Alex 2");
        let prefixed = NameListSynthesizer::with_prefix("Bot").generate(1, &[]).unwrap();
        assert_eq!(prefixed[0].name, "Bot Alex");
    }

    #[test]
    fn ids_near_the_top_of_the_range_are_refused() {
        let synthesizer = NameListSynthesizer::default();
        let at_max = vec![BotIdentity::new(u64::MAX, "last")];
        assert!(matches!(
            synthesizer.generate(1, &at_max),
            Err(SchedulerError::Validation(_))
        ));
        let near_max = vec![BotIdentity::new(u64::MAX - 2, "near")];
        let fits = synthesizer.generate(2, &near_max).unwrap();
        assert_eq!(fits.last().map(|b| b.id), Some(u64::MAX));
        assert!(synthesizer.generate(3, &near_max).is_err());
        assert!(synthesizer.generate(0, &at_max).unwrap().is_empty());
    }
}
