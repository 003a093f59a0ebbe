//! Property tests for the accounting invariants.

use proptest::prelude::*;

use vst::core::collateral::CollateralParams;
use vst::core::config::ProtocolConfig;
use vst::issuance::schedule::issuance_fraction;
use vst::liquidation::engine::compute_liquidation_split;
use vst::oracle::price_feed::StaticPriceFeed;
use vst::protocol::state_machine::ProtocolStateMachine;
use vst::utils::clock::ManualClock;
use vst::utils::constants::{DECIMAL_PRECISION, MINUTES_PER_YEAR, PERMILLE};
use vst::utils::crypto::Address;
use vst::utils::math::FixedPoint;

const E18: u128 = DECIMAL_PRECISION;
const START: u64 = 1_700_000_000;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_split_conserves_collateral_and_debt(
        coll in 1_000_000_000_000_000u128..=1_000_000 * E18,
        debt in E18..=1_000_000 * E18,
        price in E18..=100_000 * E18,
        sp_available in 0u128..=2_000_000 * E18,
        bonus_permille in 0u128..=200,
        bonus_to_sp_permille in 0u128..=200,
    ) {
        let params = CollateralParams {
            bonus: bonus_permille * PERMILLE,
            bonus_to_sp: bonus_to_sp_permille * PERMILLE,
            ..CollateralParams::default()
        };
        let split = compute_liquidation_split(coll, debt, price, &params, sp_available).unwrap();

        prop_assert_eq!(
            split.gas_compensation + split.surplus + split.coll_to_sp + split.coll_to_redistribute,
            coll
        );
        prop_assert_eq!(split.debt_to_offset + split.debt_to_redistribute, debt);
        prop_assert!(split.debt_to_offset <= sp_available);
        if split.debt_to_redistribute == 0 {
            prop_assert_eq!(split.coll_to_redistribute, 0);
        }
        if split.icr <= E18 + params.liquidation_margin() {
            prop_assert_eq!(split.surplus, 0);
        }
    }

    #[test]
    fn prop_issuance_fraction_is_monotonic(
        a in 0u64..=40 * MINUTES_PER_YEAR,
        b in 0u64..=40 * MINUTES_PER_YEAR,
        halving in 1u64..=10 * MINUTES_PER_YEAR,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let f_lo = issuance_fraction(lo, halving).unwrap();
        let f_hi = issuance_fraction(hi, halving).unwrap();
        prop_assert!(f_lo <= f_hi);
        prop_assert!(f_hi <= FixedPoint::ONE);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_stability_pool_conserves_deposits_and_collateral(
        deposits in prop::collection::vec(100u128..=5_000, 1..5),
        victim_debts in prop::collection::vec(300u128..=2_000, 1..4),
    ) {
        let config = ProtocolConfig::default();
        let owner = config.owner;
        let weth = Address::from_label("weth");
        let keeper = Address::from_label("keeper");
        let clock = ManualClock::new(START);
        let mut feed = StaticPriceFeed::new();
        feed.set_price(weth, 200 * E18, START).unwrap();
        let mut sm = ProtocolStateMachine::new(config, clock, feed).unwrap();
        sm.add_collateral(owner, weth).unwrap();
        sm.set_borrowing_fee_floor(owner, weth, 0).unwrap();

        let mut credited = 0u128;
        let whale = Address::from_label("whale");
        sm.credit_collateral(weth, whale, 10_000 * E18).unwrap();
        sm.open_trove(whale, weth, 10_000 * E18, 200_000 * E18).unwrap();
        credited += 10_000 * E18;

        let mut depositors = Vec::new();
        let mut provided = 0u128;
        for (i, amount) in deposits.iter().enumerate() {
            let who = Address::from_label(&format!("depositor-{}", i));
            let amount = amount * E18;
            sm.transfer_vst(whale, who, amount).unwrap();
            sm.provide_to_stability_pool(who, weth, amount).unwrap();
            depositors.push(who);
            provided += amount;
        }

        let mut victims = Vec::new();
        for (i, debt) in victim_debts.iter().enumerate() {
            let who = Address::from_label(&format!("victim-{}", i));
            let debt = debt * E18;
            // ICR 120% at 200, 90% at 150
            let coll = debt * 12 / 2_000;
            sm.credit_collateral(weth, who, coll).unwrap();
            sm.open_trove(who, weth, coll, debt).unwrap();
            credited += coll;
            victims.push(who);
        }

        sm.price_feed_mut().set_price(weth, 150 * E18, START).unwrap();
        let mut absorbed = 0u128;
        for victim in &victims {
            if let Ok(report) = sm.liquidate(keeper, weth, *victim) {
                absorbed += report.totals.debt_to_offset;
            }
        }

        let market = sm.market(&weth).unwrap();
        let pool = market.stability_pool();
        prop_assert_eq!(pool.total_deposits(), provided - absorbed);

        let compounded: u128 = depositors
            .iter()
            .map(|d| sm.compounded_deposit(&weth, d).unwrap())
            .sum();
        prop_assert!(compounded <= pool.total_deposits());
        prop_assert!(pool.total_deposits() - compounded <= 1_000_000_000_000);

        let gains: u128 = depositors
            .iter()
            .map(|d| sm.collateral_gain(&weth, d).unwrap())
            .sum();
        prop_assert!(gains <= pool.collateral_balance());

        let accounted = market.pools().entire_system_coll()
            + market.pools().surplus_total()
            + pool.collateral_balance()
            + sm.collateral_balance(&weth, &keeper);
        prop_assert_eq!(accounted, credited);
        prop_assert!(sm.debt_token().verify_supply_invariant());
    }
}
