//! Instrument banks: where Program Change looks up instruments.

use std::sync::Arc;

use dashmap::DashMap;

use crate::instrument::Instrument;

/// Supplies instruments by bank and program number.
///
/// `bank` is the 14-bit value assembled from CC 0 (MSB) and CC 32 (LSB).
pub trait InstrumentBank: Send + Sync {
    fn instrument(&self, bank: u16, program: u8) -> Option<Arc<Instrument>>;
}

/// In-memory bank. Safe to fill while the engine is running.
#[derive(Debug, Default)]
pub struct StaticBank {
    instruments: DashMap<(u16, u8), Arc<Instrument>>,
}

impl StaticBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `instrument` at `(bank, program)`, returning any previous one.
    pub fn insert(&self, bank: u16, program: u8, instrument: Arc<Instrument>) -> Option<Arc<Instrument>> {
        self.instruments
            .insert((bank & 0x3FFF, program & 0x7F), instrument)
    }

    pub fn remove(&self, bank: u16, program: u8) -> Option<Arc<Instrument>> {
        self.instruments
            .remove(&(bank & 0x3FFF, program & 0x7F))
            .map(|(_, instrument)| instrument)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl InstrumentBank for StaticBank {
    fn instrument(&self, bank: u16, program: u8) -> Option<Arc<Instrument>> {
        self.instruments
            .get(&(bank, program))
            .map(|entry| Arc::clone(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::VoiceDefinition;

    fn instrument(name: &str) -> Arc<Instrument> {
        Instrument::single(name, VoiceDefinition::builder(name).build().unwrap())
    }

    #[test]
    fn test_lookup_by_bank_and_program() {
        let bank = StaticBank::new();
        assert!(bank.is_empty());
        bank.insert(0, 0, instrument("piano"));
        bank.insert(1, 0, instrument("strings"));
        bank.insert(0, 5, instrument("epiano"));

        assert_eq!(bank.len(), 3);
        assert_eq!(bank.instrument(0, 0).unwrap().name(), "piano");
        assert_eq!(bank.instrument(1, 0).unwrap().name(), "strings");
        assert_eq!(bank.instrument(0, 5).unwrap().name(), "epiano");
        assert!(bank.instrument(2, 0).is_none());
    }

    #[test]
    fn test_replace_and_remove() {
        let bank = StaticBank::new();
        assert!(bank.insert(0, 1, instrument("a")).is_none());
        assert_eq!(bank.insert(0, 1, instrument("b")).unwrap().name(), "a");
        assert_eq!(bank.remove(0, 1).unwrap().name(), "b");
        assert!(bank.instrument(0, 1).is_none());
    }

    #[test]
    fn test_usable_as_trait_object() {
        let bank: Arc<dyn InstrumentBank> = Arc::new(StaticBank::new());
        assert!(bank.instrument(0, 0).is_none());
    }
}
