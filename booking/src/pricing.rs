//! Time-of-day and day-of-week pricing.
//!
//! A slot is cut into segments at every rule-window boundary that falls
//! inside it. Each segment is priced by the single rule that applies to it:
//! same resource type, same weekday, valid on the date, window covering the
//! segment. Among several matches the rule with the greatest
//! `effective_from` wins; a tie on that date is a catalog error and is
//! reported, never resolved arbitrarily.
//!
//! Arithmetic is exact: every segment contributes
//! `seconds × price_per_hour × multiplier_bp` to one numerator, which is
//! divided by `3600 × 10_000` once and rounded half-up.

use chrono::{Datelike, NaiveDate, NaiveTime};
use fieldbook_core::error::PricingError;
use fieldbook_core::types::{Money, Multiplier, PricingRule, PricingRuleId, ResourceType, ResourceTypeId};
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: u128 = 3_600;

/// One priced slice of a slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedSegment {
    /// Segment start
    pub start: NaiveTime,
    /// Segment end
    pub end: NaiveTime,
    /// Hourly price applied
    pub price_per_hour: Money,
    /// Multiplier applied
    pub multiplier: Multiplier,
    /// Rule that priced the segment (`None` for the base-price fallback)
    pub rule_id: Option<PricingRuleId>,
}

/// Price breakdown for a slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Total, rounded half-up once
    pub total: Money,
    /// Per-segment breakdown in time order
    pub segments: Vec<PricedSegment>,
}

impl Quote {
    /// Whether any segment fell back to the base price
    #[must_use]
    pub fn used_fallback(&self) -> bool {
        self.segments.iter().any(|s| s.rule_id.is_none())
    }
}

/// Stateless pricing engine
#[derive(Clone, Copy, Debug, Default)]
pub struct PricingEngine;

impl PricingEngine {
    /// Strict price: every segment must be covered by a rule.
    ///
    /// # Errors
    ///
    /// - [`PricingError::NoApplicableRule`] for the first uncovered segment
    /// - [`PricingError::AmbiguousRules`] when two rules tie
    /// - [`PricingError::Overflow`] if the total does not fit
    pub fn price(
        rules: &[PricingRule],
        resource_type: ResourceTypeId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Money, PricingError> {
        let segments = Self::segments(rules, resource_type, date, start, end, None)?;
        total(&segments)
    }

    /// Price with fallback: uncovered segments use the type's base price.
    ///
    /// # Errors
    ///
    /// - [`PricingError::AmbiguousRules`] when two rules tie
    /// - [`PricingError::Overflow`] if the total does not fit
    pub fn quote(
        resource_type: &ResourceType,
        rules: &[PricingRule],
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Quote, PricingError> {
        let segments = Self::segments(
            rules,
            resource_type.id,
            date,
            start,
            end,
            Some(resource_type.base_price_per_hour),
        )?;
        Ok(Quote {
            total: total(&segments)?,
            segments,
        })
    }

    fn segments(
        rules: &[PricingRule],
        resource_type: ResourceTypeId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        fallback: Option<Money>,
    ) -> Result<Vec<PricedSegment>, PricingError> {
        if end <= start {
            return Ok(Vec::new());
        }

        let candidates: Vec<&PricingRule> = rules
            .iter()
            .filter(|r| {
                r.resource_type_id == resource_type
                    && r.day_of_week == date.weekday()
                    && r.is_effective_on(date)
            })
            .collect();

        let mut cuts = vec![start, end];
        for rule in &candidates {
            for edge in [rule.start, rule.end] {
                if start < edge && edge < end {
                    cuts.push(edge);
                }
            }
        }
        cuts.sort_unstable();
        cuts.dedup();

        cuts.windows(2)
            .map(|w| {
                let (a, b) = (w[0], w[1]);
                match select_rule(&candidates, a, b)? {
                    Some(rule) => Ok(PricedSegment {
                        start: a,
                        end: b,
                        price_per_hour: rule.price_per_hour,
                        multiplier: rule.effective_multiplier(),
                        rule_id: Some(rule.id),
                    }),
                    None => fallback
                        .map(|price| PricedSegment {
                            start: a,
                            end: b,
                            price_per_hour: price,
                            multiplier: Multiplier::NEUTRAL,
                            rule_id: None,
                        })
                        .ok_or(PricingError::NoApplicableRule { start: a, end: b }),
                }
            })
            .collect()
    }
}

fn select_rule<'a>(
    candidates: &[&'a PricingRule],
    start: NaiveTime,
    end: NaiveTime,
) -> Result<Option<&'a PricingRule>, PricingError> {
    let covering: Vec<&PricingRule> = candidates
        .iter()
        .copied()
        .filter(|r| r.covers(start, end))
        .collect();

    let Some(newest) = covering.iter().map(|r| r.effective_from).max() else {
        return Ok(None);
    };

    let mut winners = covering.into_iter().filter(|r| r.effective_from == newest);
    let winner = winners.next();
    if winners.next().is_some() {
        return Err(PricingError::AmbiguousRules { start, end });
    }
    Ok(winner)
}

fn total(segments: &[PricedSegment]) -> Result<Money, PricingError> {
    let denominator = SECONDS_PER_HOUR * u128::from(Multiplier::SCALE);

    let numerator = segments.iter().try_fold(0u128, |acc, s| {
        let seconds = u128::try_from((s.end - s.start).num_seconds()).map_err(|_| PricingError::Overflow)?;
        seconds
            .checked_mul(u128::from(s.price_per_hour.minor()))
            .and_then(|v| v.checked_mul(u128::from(s.multiplier.basis_points())))
            .and_then(|v| acc.checked_add(v))
            .ok_or(PricingError::Overflow)
    })?;

    let rounded = (numerator + denominator / 2) / denominator;
    u64::try_from(rounded)
        .map(Money::from_minor)
        .map_err(|_| PricingError::Overflow)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use proptest::prelude::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // 2025-01-01 is a Wednesday.
    fn wednesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn rule(
        type_id: ResourceTypeId,
        start: NaiveTime,
        end: NaiveTime,
        price: u64,
        peak: Option<u32>,
    ) -> PricingRule {
        PricingRule {
            id: PricingRuleId::new(),
            resource_type_id: type_id,
            day_of_week: Weekday::Wed,
            start,
            end,
            price_per_hour: Money::from_minor(price),
            peak: peak.is_some(),
            peak_multiplier: Multiplier::from_basis_points(peak.unwrap_or(10_000)),
            effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            effective_to: None,
        }
    }

    #[test]
    fn single_covering_rule_prices_full_hour() {
        let ty = ResourceTypeId::new();
        let rules = vec![rule(ty, t(6, 0), t(22, 0), 200_000, None)];

        let price = PricingEngine::price(&rules, ty, wednesday(), t(9, 0), t(10, 0)).unwrap();

        assert_eq!(price, Money::from_minor(200_000));
    }

    #[test]
    fn split_peak_and_normal_halves() {
        let ty = ResourceTypeId::new();
        let rules = vec![
            rule(ty, t(9, 0), t(9, 30), 150_000, Some(15_000)),
            rule(ty, t(9, 30), t(10, 0), 150_000, None),
        ];

        let price = PricingEngine::price(&rules, ty, wednesday(), t(9, 0), t(10, 0)).unwrap();

        assert_eq!(price, Money::from_minor(187_500));
    }

    #[test]
    fn gap_in_rules_is_reported() {
        let ty = ResourceTypeId::new();
        let rules = vec![rule(ty, t(9, 0), t(9, 30), 100_000, None)];

        let err = PricingEngine::price(&rules, ty, wednesday(), t(9, 0), t(10, 0)).unwrap_err();

        assert_eq!(err, PricingError::NoApplicableRule { start: t(9, 30), end: t(10, 0) });
    }

    #[test]
    fn quote_falls_back_to_base_price_for_gaps() {
        let ty = ResourceType {
            id: ResourceTypeId::new(),
            name: "7-a-side".to_string(),
            base_price_per_hour: Money::from_minor(120_000),
        };
        let rules = vec![rule(ty.id, t(9, 0), t(9, 30), 200_000, None)];

        let quote = PricingEngine::quote(&ty, &rules, wednesday(), t(9, 0), t(10, 0)).unwrap();

        assert_eq!(quote.total, Money::from_minor(160_000));
        assert!(quote.used_fallback());
        assert_eq!(quote.segments.len(), 2);
    }

    #[test]
    fn newest_effective_rule_wins() {
        let ty = ResourceTypeId::new();
        let old = rule(ty, t(6, 0), t(22, 0), 100_000, None);
        let mut new = rule(ty, t(6, 0), t(22, 0), 130_000, None);
        new.effective_from = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();

        let price = PricingEngine::price(&[old, new], ty, wednesday(), t(9, 0), t(10, 0)).unwrap();

        assert_eq!(price, Money::from_minor(130_000));
    }

    #[test]
    fn rules_not_yet_effective_are_ignored() {
        let ty = ResourceTypeId::new();
        let current = rule(ty, t(6, 0), t(22, 0), 100_000, None);
        let mut future = rule(ty, t(6, 0), t(22, 0), 999_000, None);
        future.effective_from = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let mut lapsed = rule(ty, t(6, 0), t(22, 0), 1, None);
        lapsed.effective_from = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        lapsed.effective_to = Some(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());

        let price =
            PricingEngine::price(&[current, future, lapsed], ty, wednesday(), t(9, 0), t(10, 0)).unwrap();

        assert_eq!(price, Money::from_minor(100_000));
    }

    #[test]
    fn tie_on_effective_from_is_ambiguous() {
        let ty = ResourceTypeId::new();
        let a = rule(ty, t(6, 0), t(22, 0), 100_000, None);
        let b = rule(ty, t(8, 0), t(12, 0), 110_000, None);

        let err = PricingEngine::price(&[a, b], ty, wednesday(), t(9, 0), t(10, 0)).unwrap_err();

        assert!(matches!(err, PricingError::AmbiguousRules { .. }));
    }

    #[test]
    fn other_weekdays_and_types_do_not_apply() {
        let ty = ResourceTypeId::new();
        let mut thursday = rule(ty, t(6, 0), t(22, 0), 100_000, None);
        thursday.day_of_week = Weekday::Thu;
        let other_type = rule(ResourceTypeId::new(), t(6, 0), t(22, 0), 100_000, None);

        let err = PricingEngine::price(&[thursday, other_type], ty, wednesday(), t(9, 0), t(10, 0));

        assert!(matches!(err, Err(PricingError::NoApplicableRule { .. })));
    }

    #[test]
    fn fractional_result_rounds_half_up() {
        let ty = ResourceTypeId::new();
        // 20 minutes at 100,001/h = 33,333.67 -> 33,334
        let rules = vec![rule(ty, t(6, 0), t(22, 0), 100_001, None)];
        let price = PricingEngine::price(&rules, ty, wednesday(), t(9, 0), t(9, 20)).unwrap();
        assert_eq!(price, Money::from_minor(33_334));
    }

    proptest! {
        #[test]
        fn rule_order_does_not_change_price(
            split in 1u32..16,
            first_price in 10_000u64..500_000,
            second_price in 10_000u64..500_000,
            rotate in 0usize..3,
        ) {
            let ty = ResourceTypeId::new();
            let boundary = t(8 + split / 4, (split % 4) * 15);
            let mut rules = vec![
                rule(ty, t(6, 0), boundary, first_price, Some(12_500)),
                rule(ty, boundary, t(23, 0), second_price, None),
                rule(ResourceTypeId::new(), t(0, 0), t(23, 59), 1, None),
            ];
            let expected = PricingEngine::price(&rules, ty, wednesday(), t(8, 0), t(13, 0)).unwrap();
            rules.rotate_left(rotate);
            let actual = PricingEngine::price(&rules, ty, wednesday(), t(8, 0), t(13, 0)).unwrap();
            prop_assert_eq!(expected, actual);
        }

        #[test]
        fn splitting_a_slot_changes_total_by_at_most_rounding(
            price in 1u64..1_000_000,
            cut in 1u32..12,
        ) {
            let ty = ResourceTypeId::new();
            let rules = vec![rule(ty, t(6, 0), t(22, 0), price, None)];
            let mid = t(9 + cut / 4, (cut % 4) * 15);
            let whole = PricingEngine::price(&rules, ty, wednesday(), t(9, 0), t(12, 0)).unwrap().minor();
            let left = PricingEngine::price(&rules, ty, wednesday(), t(9, 0), mid).unwrap().minor();
            let right = PricingEngine::price(&rules, ty, wednesday(), mid, t(12, 0)).unwrap().minor();
            prop_assert!(whole.abs_diff(left + right) <= 1);
        }
    }
}
