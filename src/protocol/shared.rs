//! Thread-safe handle for multi-threaded hosts.

use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::oracle::price_feed::PriceFeed;
use crate::protocol::state_machine::ProtocolStateMachine;
use crate::utils::clock::Clock;

/// Cloneable handle serializing writers over one state machine
pub struct SharedProtocol<C: Clock, F: PriceFeed> {
    inner: Arc<RwLock<ProtocolStateMachine<C, F>>>,
}

impl<C: Clock, F: PriceFeed> Clone for SharedProtocol<C, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock, F: PriceFeed> SharedProtocol<C, F> {
    /// Wrap a state machine
    pub fn new(machine: ProtocolStateMachine<C, F>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(machine)),
        }
    }

    /// Run a read-only closure under the read lock
    pub fn read<T>(&self, f: impl FnOnce(&ProtocolStateMachine<C, F>) -> T) -> Result<T> {
        let guard = self.inner.read().map_err(|_| Error::Lock)?;
        Ok(f(&guard))
    }

    /// Run a mutating operation under the write lock
    pub fn write<T>(&self, f: impl FnOnce(&mut ProtocolStateMachine<C, F>) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.write().map_err(|_| Error::Lock)?;
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProtocolConfig;
    use crate::oracle::price_feed::StaticPriceFeed;
    use crate::utils::clock::ManualClock;
    use crate::utils::constants::DECIMAL_PRECISION;
    use crate::utils::crypto::Address;
    use std::thread;

    #[test]
    fn test_concurrent_deposits() {
        let config = ProtocolConfig::default();
        let owner = config.owner;
        let weth = Address::from_label("weth");
        let clock = ManualClock::new(1_000);
        let mut feed = StaticPriceFeed::new();
        feed.set_price(weth, 100 * DECIMAL_PRECISION, 1_000).unwrap();

        let mut machine = ProtocolStateMachine::new(config, clock, feed).unwrap();
        machine.add_collateral(owner, weth).unwrap();
        let shared = SharedProtocol::new(machine);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let who = Address::from_label(&format!("borrower-{}", i));
                    shared.write(|sm| {
                        sm.credit_collateral(weth, who, 100 * DECIMAL_PRECISION)?;
                        sm.open_trove(who, weth, 100 * DECIMAL_PRECISION, 1_000 * DECIMAL_PRECISION)
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let active = shared.read(|sm| sm.market(&weth).map(|m| m.troves().active_count())).unwrap();
        assert_eq!(active.unwrap(), 4);
        let supply = shared.read(|sm| sm.debt_token().total_supply()).unwrap();
        assert_eq!(supply, 4_020 * DECIMAL_PRECISION);
    }
}
