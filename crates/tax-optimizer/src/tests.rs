#[cfg(test)]
mod harvesting_scenarios {
    use crate::{
        HarvestInputs, HarvestWarning, HarvestingConfig, HarvestingEngine, Lot, RejectionReason,
        SkipReason, TaxRules, TradeRecord, TradeSide, WashSaleHistory,
    };
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use index_core::{ExclusionSet, Instrument, Universe};
    use nalgebra::DMatrix;
    use std::collections::BTreeMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn universe() -> Universe {
        Universe::new(vec![
            Instrument::new("XOM", "Energy"),
            Instrument::new("CVX", "Energy"),
            Instrument::new("COP", "Energy"),
            Instrument::new("AAPL", "Information Technology"),
            Instrument::new("MSFT", "Information Technology"),
        ])
        .unwrap()
    }

    fn correlation() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            5,
            5,
            &[
                1.0, 0.85, 0.70, 0.20, 0.25, //
                0.85, 1.0, 0.75, 0.20, 0.20, //
                0.70, 0.75, 1.0, 0.15, 0.10, //
                0.20, 0.20, 0.15, 1.0, 0.80, //
                0.25, 0.20, 0.10, 0.80, 1.0,
            ],
        )
    }

    fn prices() -> BTreeMap<String, f64> {
        [("XOM", 70.0), ("CVX", 140.0), ("COP", 100.0), ("AAPL", 150.0), ("MSFT", 300.0)]
            .into_iter()
            .map(|(t, p)| (t.to_string(), p))
            .collect()
    }

    fn engine(threshold: f64) -> HarvestingEngine {
        HarvestingEngine::new(
            TaxRules::us(),
            HarvestingConfig {
                loss_threshold: threshold,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_loss_beyond_threshold_qualifies() {
        let lots = vec![Lot::new("lot-1", "acct-1", "XOM", 10.0, 100.0, date(2024, 1, 5))];
        let prices = prices();
        let history = WashSaleHistory::new();
        let exclusions = ExclusionSet::new();
        let universe = universe();
        let corr = correlation();
        let report = engine(200.0)
            .find_candidates(&HarvestInputs {
                lots: &lots,
                prices: &prices,
                history: &history,
                universe: &universe,
                correlation: Some(&corr),
                exclusions: &exclusions,
                as_of: date(2024, 6, 20),
            })
            .unwrap();

        assert_eq!(report.candidates.len(), 1);
        let candidate = &report.candidates[0];
        assert_relative_eq!(candidate.unrealized_loss, 300.0);
        let substitute = candidate.substitute.as_ref().unwrap();
        assert_eq!(substitute.ticker, "CVX");
        assert_ne!(substitute.ticker, candidate.ticker);
        assert!(substitute.same_sector);
        assert!(!candidate.wash_sale_risk);
        assert!(candidate.warnings.is_empty());
        assert_eq!(candidate.repurchase_blocked_until, Some(date(2024, 7, 21)));
        assert_relative_eq!(report.total_harvestable_loss, 300.0);
        assert_relative_eq!(report.total_estimated_tax_savings, 111.0, epsilon = 1e-9);
    }

    #[test]
    fn test_recently_sold_peer_is_skipped_for_next_best() {
        let lots = vec![Lot::new("lot-1", "acct-1", "XOM", 10.0, 100.0, date(2024, 1, 5))];
        let prices = prices();
        let history = WashSaleHistory::from_trades(vec![TradeRecord {
            account_id: "acct-1".to_string(),
            ticker: "CVX".to_string(),
            side: TradeSide::Sell,
            date: date(2024, 6, 1),
        }]);
        let exclusions = ExclusionSet::new();
        let universe = universe();
        let corr = correlation();
        let report = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &lots,
                prices: &prices,
                history: &history,
                universe: &universe,
                correlation: Some(&corr),
                exclusions: &exclusions,
                as_of: date(2024, 6, 20),
            })
            .unwrap();

        let candidate = &report.candidates[0];
        assert_eq!(candidate.substitute.as_ref().unwrap().ticker, "COP");
        assert_eq!(candidate.rejected_substitutes.len(), 1);
        assert_eq!(candidate.rejected_substitutes[0].ticker, "CVX");
        assert_eq!(
            candidate.rejected_substitutes[0].reason,
            RejectionReason::RecentlySold {
                sold_on: date(2024, 6, 1)
            }
        );
    }

    #[test]
    fn test_no_passing_peer_keeps_candidate_with_warning() {
        let lots = vec![Lot::new("lot-1", "acct-1", "XOM", 10.0, 100.0, date(2024, 1, 5))];
        let prices = prices();
        let history = WashSaleHistory::from_trades(vec![TradeRecord {
            account_id: "acct-1".to_string(),
            ticker: "CVX".to_string(),
            side: TradeSide::Sell,
            date: date(2024, 6, 1),
        }]);
        let exclusions = ExclusionSet::new().with_ticker("COP");
        let universe = universe();
        let corr = correlation();
        let report = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &lots,
                prices: &prices,
                history: &history,
                universe: &universe,
                correlation: Some(&corr),
                exclusions: &exclusions,
                as_of: date(2024, 6, 20),
            })
            .unwrap();

        let candidate = &report.candidates[0];
        assert!(candidate.substitute.is_none());
        assert!(candidate.wash_sale_risk);
        assert!(candidate.has_warning(&HarvestWarning::NoSubstituteAvailable));
        assert_eq!(candidate.rejected_substitutes.len(), 2);
    }

    #[test]
    fn test_pre_existing_taint_flags_candidate() {
        let lots = vec![
            Lot::new("lot-1", "acct-1", "XOM", 10.0, 100.0, date(2024, 1, 5)),
            Lot::new("lot-2", "acct-1", "XOM", 2.0, 75.0, date(2024, 6, 10)),
        ];
        let prices = prices();
        let history = WashSaleHistory::new();
        let exclusions = ExclusionSet::new();
        let universe = universe();
        let corr = correlation();
        let report = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &lots,
                prices: &prices,
                history: &history,
                universe: &universe,
                correlation: Some(&corr),
                exclusions: &exclusions,
                as_of: date(2024, 6, 20),
            })
            .unwrap();

        assert_eq!(report.candidates.len(), 2);
        for candidate in &report.candidates {
            assert!(candidate.wash_sale_risk);
            assert!(candidate.substitute.is_none());
            assert!(candidate.has_warning(&HarvestWarning::PreExistingWashSale {
                bought_on: date(2024, 6, 10)
            }));
        }
    }

    #[test]
    fn test_ordering_and_idempotence() {
        let lots = vec![
            Lot::new("lot-b", "acct-1", "AAPL", 10.0, 170.0, date(2023, 2, 1)),
            Lot::new("lot-a", "acct-1", "MSFT", 2.0, 400.0, date(2023, 3, 1)),
            Lot::new("lot-c", "acct-1", "COP", 4.0, 150.0, date(2023, 3, 1)),
            Lot::new("lot-d", "acct-1", "CVX", 5.0, 120.0, date(2023, 3, 1)),
        ];
        let prices = prices();
        let history = WashSaleHistory::new();
        let exclusions = ExclusionSet::new();
        let universe = universe();
        let corr = correlation();
        let inputs = HarvestInputs {
            lots: &lots,
            prices: &prices,
            history: &history,
            universe: &universe,
            correlation: Some(&corr),
            exclusions: &exclusions,
            as_of: date(2024, 6, 20),
        };

        let first = engine(0.0).find_candidates(&inputs).unwrap();
        let second = engine(0.0).find_candidates(&inputs).unwrap();
        assert_eq!(first, second);

        // Three equal $200 losses fall back to lot id; the CVX lot is a gain.
        let ids: Vec<&str> = first.candidates.iter().map(|c| c.lot_id.as_str()).collect();
        assert_eq!(ids, vec!["lot-a", "lot-b", "lot-c"]);
        assert!(first
            .candidates
            .windows(2)
            .all(|w| w[0].unrealized_loss >= w[1].unrealized_loss));
    }

    #[test]
    fn test_accepted_harvest_blocks_reusing_its_substitute_pair() {
        let lots = vec![Lot::new("lot-1", "acct-1", "XOM", 10.0, 100.0, date(2024, 1, 5))];
        let prices = prices();
        let history = WashSaleHistory::new();
        let exclusions = ExclusionSet::new();
        let universe = universe();
        let corr = correlation();
        let as_of = date(2024, 6, 20);
        let report = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &lots,
                prices: &prices,
                history: &history,
                universe: &universe,
                correlation: Some(&corr),
                exclusions: &exclusions,
                as_of,
            })
            .unwrap();

        let accepted = history.with_accepted(&report.candidates[0], as_of);
        assert!(history.trades().is_empty());
        assert_eq!(accepted.trades().len(), 2);
        assert_eq!(accepted.last_sale("acct-1", "XOM", as_of), Some(as_of));

        // The CVX bought on acceptance taints a CVX harvest a week later.
        let cvx_lots = vec![Lot::new("lot-2", "acct-1", "CVX", 1.0, 200.0, date(2023, 1, 5))];
        let later = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &cvx_lots,
                prices: &prices,
                history: &accepted,
                universe: &universe,
                correlation: Some(&corr),
                exclusions: &exclusions,
                as_of: date(2024, 6, 27),
            })
            .unwrap();
        assert!(later.candidates[0].has_warning(&HarvestWarning::PreExistingWashSale { bought_on: as_of }));

        // XOM was sold on acceptance, so a COP harvest cannot rotate into it.
        let cop_lots = vec![Lot::new("lot-3", "acct-1", "COP", 3.0, 120.0, date(2023, 1, 5))];
        let no_cvx = ExclusionSet::new().with_ticker("CVX");
        let rotated = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &cop_lots,
                prices: &prices,
                history: &accepted,
                universe: &universe,
                correlation: Some(&corr),
                exclusions: &no_cvx,
                as_of: date(2024, 6, 27),
            })
            .unwrap();
        let candidate = &rotated.candidates[0];
        assert!(candidate.substitute.is_none());
        assert_eq!(
            candidate.rejected_substitutes[1].reason,
            RejectionReason::RecentlySold { sold_on: as_of }
        );
        assert_eq!(candidate.rejected_substitutes[1].ticker, "XOM");
    }

    #[test]
    fn test_bad_lots_are_skipped_not_fatal() {
        let lots = vec![
            Lot::new("no-price", "acct-1", "TSLA", 10.0, 250.0, date(2024, 1, 5)),
            Lot::new("empty", "acct-1", "XOM", 0.0, 100.0, date(2024, 1, 5)),
            Lot::new("ok", "acct-1", "XOM", 1.0, 100.0, date(2024, 1, 5)),
        ];
        let prices = prices();
        let history = WashSaleHistory::new();
        let exclusions = ExclusionSet::new();
        let universe = universe();
        let report = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &lots,
                prices: &prices,
                history: &history,
                universe: &universe,
                correlation: None,
                exclusions: &exclusions,
                as_of: date(2024, 6, 20),
            })
            .unwrap();

        assert_eq!(report.lots_evaluated, 3);
        assert_eq!(report.candidates.len(), 1);
        let reasons: Vec<SkipReason> = report.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![SkipReason::MissingPrice, SkipReason::NonPositiveShares]);
    }

    #[test]
    fn test_unknown_ticker_reported_without_substitute() {
        let lots = vec![Lot::new("lot-1", "acct-1", "TSLA", 10.0, 250.0, date(2024, 1, 5))];
        let mut prices = prices();
        prices.insert("TSLA".to_string(), 180.0);
        let history = WashSaleHistory::new();
        let exclusions = ExclusionSet::new();
        let universe = universe();
        let report = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &lots,
                prices: &prices,
                history: &history,
                universe: &universe,
                correlation: None,
                exclusions: &exclusions,
                as_of: date(2024, 6, 20),
            })
            .unwrap();
        let candidate = &report.candidates[0];
        assert!(candidate.sector.is_none());
        assert!(candidate.has_warning(&HarvestWarning::NotInUniverse));
        assert!(candidate.has_warning(&HarvestWarning::NoSubstituteAvailable));
    }

    #[test]
    fn test_report_serializes() {
        let lots = vec![Lot::new("lot-1", "acct-1", "XOM", 10.0, 100.0, date(2024, 1, 5))];
        let prices = prices();
        let history = WashSaleHistory::new();
        let exclusions = ExclusionSet::new();
        let universe = universe();
        let report = engine(0.0)
            .find_candidates(&HarvestInputs {
                lots: &lots,
                prices: &prices,
                history: &history,
                universe: &universe,
                correlation: None,
                exclusions: &exclusions,
                as_of: date(2024, 6, 20),
            })
            .unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"substitute\""));
    }
}
