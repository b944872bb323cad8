//! Prompt text for the attribution commentary writer.

use attribution_engine::{AttributionResult, InstrumentContribution};
use chrono::NaiveDate;
use serde_json::{json, Value};

/// Portfolio manager persona
pub const SYSTEM_PROMPT: &str = r#"You are a Senior Portfolio Manager at a top-tier asset management firm.
Your goal is to write a concise, professional, and insightful performance commentary for a high net worth client.
Your tone should be professional and reassuring, mathematically precise (cite the numbers), and explanatory.

## RULES (STRICT COMPLIANCE)
1. **The Exclusion Rule**: If a stock or sector has "Status": "Excluded", NEVER refer to it as a "Holding". We don't own it. Its negative contribution is a "Missed Opportunity" or "Drag from Benchmark Rally".
2. **The Active Return Rule**: Only call a stock a "Contributor" if its "Active_Contribution" is POSITIVE.
   - If we don't own a stock (Weight = 0%) and it went UP, it is a DETRACTOR (Active Contribution is NEGATIVE).
   - If we don't own a stock and it went DOWN, it is a CONTRIBUTOR (Active Contribution is POSITIVE).
3. **The GICS Rule**: Adhere strictly to the "Sector" field provided in the input JSON. Do not invent sectors.
4. **Data Grounding**: Do not cite any data not present in the provided JSON "Truth Tables".

Avoid generic financial advice. Focus strictly on the attribution data provided.
"#;

/// Header the commentary must open with
pub fn commentary_header(date: NaiveDate) -> String {
    format!("Market Commentary - {}", long_date(date))
}

/// "February 03, 2026"
pub fn long_date(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}

/// Contribution rows in the shape the persona's rules refer to.
pub fn contribution_rows(rows: &[InstrumentContribution]) -> Value {
    Value::Array(
        rows.iter()
            .map(|c| {
                json!({
                    "Ticker": c.ticker,
                    "Sector": c.sector,
                    "Weight": format!("{:.2}%", c.portfolio_weight * 100.0),
                    "Active_Contribution": format!("{:.4}%", c.active_contribution * 100.0),
                    "Status": c.status.to_string(),
                })
            })
            .collect(),
    )
}

/// User prompt for a trailing-window attribution report.
pub fn attribution_prompt(
    result: &AttributionResult,
    exclusions: &str,
    lookback_periods: usize,
    date: NaiveDate,
) -> String {
    let current_date = long_date(date);
    format!(
        r#"
Current Date: {current_date}
INSTRUCTION: Start your commentary exactly with the header: "{header}"

Write a "Trailing {lookback}-Day Risk & Performance Attribution" report relative to the benchmark.

## Constraints Applied
- Exclusions: {exclusions}

## Brinson-Fachler Attribution Data (Trailing {lookback} Days)
- Total Active Return (Alpha): {active:.2}%
- Allocation Effect (Impact of Sector Weights): {allocation:.2}%
- Selection Effect (Impact of Stock Picking): {selection:.2}%

## Attribution Detail (The "Truth Tables")
**Top Active Contributors (JSON)**:
{contributors}

**Top Active Detractors (JSON)**:
{detractors}

## Guidelines for the Narrative:
1. **Timeframe**: Use the EXACT date provided: "{current_date}".
2. **Ticker Validation**: Use the Ticker symbols exactly as listed.
3. **Attribution Logic**:
   - If a sector is excluded (Allocation Effect), describe it as a strategic decision.
   - For Detractors that are "Excluded" (e.g. Status: Excluded), say: "The portfolio faced a headwind due to the exclusion of [Sector/Stock], which rallied during the period."
   - DO NOT say "We held [Excluded Stock]".
4. **Chain of Thought (Mental Check)**:
   - First, scan the JSON. Identify the "Status" of the top movers.
   - Second, match the Sector to the Stock.
   - Third, write the commentary based ONLY on these facts.

Write a professional, concise 3-paragraph commentary.
"#,
        current_date = current_date,
        header = commentary_header(date),
        lookback = lookback_periods,
        exclusions = exclusions,
        active = result.active_return * 100.0,
        allocation = result.allocation_effect * 100.0,
        selection = result.selection_effect * 100.0,
        contributors = contribution_rows(&result.top_contributors),
        detractors = contribution_rows(&result.top_detractors),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_engine::ContributionStatus;

    fn contribution(ticker: &str, weight: f64, active: f64, status: ContributionStatus) -> InstrumentContribution {
        InstrumentContribution {
            ticker: ticker.to_string(),
            sector: "Information Technology".to_string(),
            portfolio_weight: weight,
            benchmark_weight: 0.06,
            active_weight: weight - 0.06,
            period_return: 0.10,
            active_contribution: active,
            status,
        }
    }

    #[test]
    fn test_rows_use_persona_keys() {
        let rows = contribution_rows(&[contribution("MSFT", 0.0, -0.006, ContributionStatus::Excluded)]);
        let row = &rows[0];
        assert_eq!(row["Ticker"], "MSFT");
        assert_eq!(row["Status"], "Excluded");
        assert_eq!(row["Weight"], "0.00%");
        assert_eq!(row["Active_Contribution"], "-0.6000%");
    }

    #[test]
    fn test_long_date_format() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        assert_eq!(long_date(date), "February 03, 2026");
        assert_eq!(commentary_header(date), "Market Commentary - February 03, 2026");
    }

    #[test]
    fn test_prompt_carries_totals_and_tables() {
        let result = AttributionResult {
            sectors: Vec::new(),
            portfolio_return: 0.012,
            benchmark_return: 0.015,
            active_return: -0.003,
            allocation_effect: -0.004,
            selection_effect: 0.001,
            interaction_effect: 0.0,
            top_sectors: Vec::new(),
            top_contributors: vec![contribution("AAPL", 0.05, 0.001, ContributionStatus::Held)],
            top_detractors: vec![contribution("MSFT", 0.0, -0.006, ContributionStatus::Excluded)],
        };
        let date = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        let prompt = attribution_prompt(&result, "Energy", 30, date);

        assert!(prompt.contains("Total Active Return (Alpha): -0.30%"));
        assert!(prompt.contains("Allocation Effect (Impact of Sector Weights): -0.40%"));
        assert!(prompt.contains("- Exclusions: Energy"));
        assert!(prompt.contains("\"Ticker\":\"AAPL\""));
        assert!(prompt.contains("Market Commentary - February 03, 2026"));
        assert!(prompt.contains("Trailing 30-Day"));
    }
}
