#[cfg(test)]
mod attribution_scenarios {
    use crate::{AttributionEngine, ContributionStatus};
    use approx::assert_relative_eq;
    use index_core::{BenchmarkWeights, ExclusionSet, IndexingError, Instrument, Universe};
    use std::collections::BTreeMap;

    fn universe() -> Universe {
        Universe::new(vec![
            Instrument::new("A", "Tech"),
            Instrument::new("B", "Tech"),
            Instrument::new("C", "Energy"),
            Instrument::new("D", "Energy"),
            Instrument::new("E", "Financials"),
        ])
        .unwrap()
    }

    fn benchmark() -> BenchmarkWeights {
        BenchmarkWeights::new(vec![0.3, 0.2, 0.15, 0.15, 0.2]).unwrap()
    }

    #[test]
    fn test_holdings_attribution_closes() {
        let portfolio = [0.45, 0.25, 0.0, 0.0, 0.3];
        let returns = [0.04, -0.01, 0.06, 0.03, 0.01];
        let result = AttributionEngine::default()
            .attribute_holdings(
                &universe(),
                &portfolio,
                &benchmark(),
                &returns,
                &ExclusionSet::new().with_sector("Energy"),
            )
            .unwrap();

        let rp: f64 = portfolio.iter().zip(&returns).map(|(w, r)| w * r).sum();
        let rb: f64 = benchmark()
            .as_slice()
            .iter()
            .zip(&returns)
            .map(|(w, r)| w * r)
            .sum();
        assert_relative_eq!(result.portfolio_return, rp, epsilon = 1e-12);
        assert_relative_eq!(result.benchmark_return, rb, epsilon = 1e-12);

        let sum: f64 = result.sectors.iter().map(|s| s.allocation + s.selection).sum();
        assert!((sum - (rp - rb)).abs() <= 1e-6);

        // Excluded sector: no portfolio weight, so no selection effect.
        let energy = result.sector("Energy").unwrap();
        assert_eq!(energy.portfolio_weight, 0.0);
        assert_relative_eq!(energy.selection, 0.0, epsilon = 1e-15);
        assert!(energy.allocation < 0.0);

        assert!(result
            .top_detractors
            .iter()
            .any(|c| c.ticker == "C" && c.status == ContributionStatus::Excluded));
        assert_eq!(result.top_contributors[0].ticker, "A");
    }

    #[test]
    fn test_sector_returns_must_cover_universe() {
        let mut benchmark_returns = BTreeMap::new();
        benchmark_returns.insert("Tech".to_string(), 0.02);
        benchmark_returns.insert("Energy".to_string(), 0.01);
        let err = AttributionEngine::default()
            .attribute(
                &universe(),
                &[0.5, 0.2, 0.0, 0.0, 0.3],
                &benchmark(),
                &BTreeMap::new(),
                &benchmark_returns,
                0.0,
            )
            .unwrap_err();
        assert!(matches!(err, IndexingError::DataMismatch(_)));
        assert!(!err.aborts_request());
    }

    #[test]
    fn test_sector_level_entry_defaults_unheld_sector_to_benchmark() {
        let mut benchmark_returns = BTreeMap::new();
        benchmark_returns.insert("Tech".to_string(), 0.02);
        benchmark_returns.insert("Energy".to_string(), 0.04);
        benchmark_returns.insert("Financials".to_string(), -0.01);
        let mut portfolio_returns = BTreeMap::new();
        portfolio_returns.insert("Tech".to_string(), 0.025);
        portfolio_returns.insert("Financials".to_string(), 0.0);

        let rb = 0.5 * 0.02 + 0.3 * 0.04 + 0.2 * -0.01;
        let result = AttributionEngine::default()
            .attribute(
                &universe(),
                &[0.5, 0.2, 0.0, 0.0, 0.3],
                &benchmark(),
                &portfolio_returns,
                &benchmark_returns,
                rb,
            )
            .unwrap();
        let energy = result.sector("Energy").unwrap();
        assert_eq!(energy.portfolio_return, 0.04);
        let rp = 0.7 * 0.025 + 0.3 * 0.0;
        assert_relative_eq!(result.active_return, rp - rb, epsilon = 1e-12);
        assert_relative_eq!(
            result.allocation_effect + result.selection_effect,
            rp - rb,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_held_sector_without_return_is_mismatch() {
        let mut benchmark_returns = BTreeMap::new();
        for sector in ["Tech", "Energy", "Financials"] {
            benchmark_returns.insert(sector.to_string(), 0.01);
        }
        let result = AttributionEngine::default().attribute(
            &universe(),
            &[0.5, 0.2, 0.0, 0.0, 0.3],
            &benchmark(),
            &BTreeMap::new(),
            &benchmark_returns,
            0.01,
        );
        assert!(matches!(result, Err(IndexingError::DataMismatch(_))));
    }

    #[test]
    fn test_return_vector_length_mismatch() {
        let result = AttributionEngine::default().attribute_holdings(
            &universe(),
            &[0.5, 0.2, 0.0, 0.0, 0.3],
            &benchmark(),
            &[0.01, 0.02],
            &ExclusionSet::new(),
        );
        assert!(matches!(result, Err(IndexingError::DataMismatch(_))));
    }

    #[test]
    fn test_result_serializes() {
        let result = AttributionEngine::default()
            .attribute_holdings(
                &universe(),
                &[0.3, 0.2, 0.15, 0.15, 0.2],
                &benchmark(),
                &[0.01; 5],
                &ExclusionSet::new(),
            )
            .unwrap();
        assert_relative_eq!(result.active_return, 0.0, epsilon = 1e-15);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["sectors"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_sector_aliases_form_one_sector() {
        let universe = Universe::new(vec![
            Instrument::new("A", "Tech"),
            Instrument::new("B", "Information Technology"),
            Instrument::new("C", "Energy"),
        ])
        .unwrap();
        let benchmark = BenchmarkWeights::new(vec![0.3, 0.3, 0.4]).unwrap();
        let portfolio = [0.5, 0.5, 0.0];
        let engine = AttributionEngine::default();

        let holdings = engine
            .attribute_holdings(
                &universe,
                &portfolio,
                &benchmark,
                &[0.02, 0.04, 0.01],
                &ExclusionSet::new().with_sector("Energy"),
            )
            .unwrap();
        assert_eq!(holdings.sectors.len(), 2);
        let tech = holdings.sector("Tech").unwrap();
        assert_relative_eq!(tech.portfolio_weight, 1.0, epsilon = 1e-12);
        assert_relative_eq!(tech.benchmark_weight, 0.6, epsilon = 1e-12);

        // Sector returns keyed by yet another alias
        let mut benchmark_returns = BTreeMap::new();
        benchmark_returns.insert("Technology".to_string(), 0.03);
        benchmark_returns.insert("Energy".to_string(), 0.01);
        let mut portfolio_returns = BTreeMap::new();
        portfolio_returns.insert("Information Technology".to_string(), 0.03);
        let total = 0.6 * 0.03 + 0.4 * 0.01;
        let sectors = engine
            .attribute(
                &universe,
                &portfolio,
                &benchmark,
                &portfolio_returns,
                &benchmark_returns,
                total,
            )
            .unwrap();
        let tech = sectors.sector("Tech").unwrap();
        assert_relative_eq!(tech.allocation, 0.4 * (0.03 - total), epsilon = 1e-12);
        assert_relative_eq!(tech.selection, 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_conflicting_alias_returns_are_a_mismatch() {
        let universe = Universe::new(vec![
            Instrument::new("A", "Tech"),
            Instrument::new("C", "Energy"),
        ])
        .unwrap();
        let benchmark = BenchmarkWeights::new(vec![0.5, 0.5]).unwrap();
        let mut benchmark_returns = BTreeMap::new();
        benchmark_returns.insert("Tech".to_string(), 0.03);
        benchmark_returns.insert("Technology".to_string(), 0.05);
        benchmark_returns.insert("Energy".to_string(), 0.01);
        let result = AttributionEngine::default().attribute(
            &universe,
            &[0.5, 0.5],
            &benchmark,
            &BTreeMap::new(),
            &benchmark_returns,
            0.02,
        );
        assert!(matches!(result, Err(IndexingError::DataMismatch(_))));
    }
}
