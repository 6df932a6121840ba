//! Visitor satisfaction scoring.

use rand::Rng;

/// What a group experienced, as seen at the end of its tour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisitFacts {
    pub simulated_minutes: f64,
    pub paintings_seen: u32,
    pub questions_asked: u32,
    pub group_size: u32,
    pub is_vip: bool,
}

/// Additive score around a neutral 3, clamped to 1..=5.
///
/// Every weight is public so a run can be tuned without code changes.
#[derive(Debug, Clone, PartialEq)]
pub struct SatisfactionModel {
    pub ideal_minutes: (f64, f64),
    pub duration_bonus: f64,
    /// Penalty per simulated minute outside the ideal band.
    pub duration_penalty_per_minute: f64,
    pub max_duration_penalty: f64,
    pub paintings_threshold: u32,
    pub paintings_weight: f64,
    /// Groups above this size lose `crowd_penalty`.
    pub large_group_size: u32,
    pub crowd_penalty: f64,
    /// VIPs notice a good tour more and a bad one more.
    pub vip_weight: f64,
    pub question_bonus: f64,
    pub max_question_bonus: f64,
    /// Half-width of the uniform noise added before rounding.
    pub noise: f64,
}

impl Default for SatisfactionModel {
    fn default() -> Self {
        Self {
            ideal_minutes: (45.0, 90.0),
            duration_bonus: 1.0,
            duration_penalty_per_minute: 1.0 / 30.0,
            max_duration_penalty: 1.5,
            paintings_threshold: 6,
            paintings_weight: 0.75,
            large_group_size: 15,
            crowd_penalty: 0.5,
            vip_weight: 0.5,
            question_bonus: 0.1,
            max_question_bonus: 0.5,
            noise: 0.5,
        }
    }
}

impl SatisfactionModel {
    /// Deterministic part of the score, before noise and rounding.
    pub fn raw_score(&self, facts: &VisitFacts) -> f64 {
        let (low, high) = self.ideal_minutes;
        let in_band = (low..=high).contains(&facts.simulated_minutes);

        let duration = if in_band {
            self.duration_bonus
        } else {
            let distance = if facts.simulated_minutes < low {
                low - facts.simulated_minutes
            } else {
                facts.simulated_minutes - high
            };
            -(distance * self.duration_penalty_per_minute).min(self.max_duration_penalty)
        };

        let paintings = if facts.paintings_seen >= self.paintings_threshold {
            self.paintings_weight
        } else {
            let missing = self.paintings_threshold - facts.paintings_seen;
            -self.paintings_weight * f64::from(missing) / f64::from(self.paintings_threshold.max(1))
        };

        let crowd = if facts.group_size > self.large_group_size {
            -self.crowd_penalty
        } else {
            0.0
        };

        let vip = match (facts.is_vip, in_band) {
            (false, _) => 0.0,
            (true, true) => self.vip_weight,
            (true, false) => -self.vip_weight,
        };

        let questions =
            (f64::from(facts.questions_asked) * self.question_bonus).min(self.max_question_bonus);

        3.0 + duration + paintings + crowd + vip + questions
    }

    /// Final 1..=5 score.
    pub fn score<R: Rng>(&self, facts: &VisitFacts, rng: &mut R) -> u8 {
        let noise = if self.noise > 0.0 {
            rng.random_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        let score = (self.raw_score(facts) + noise).round().clamp(1.0, 5.0);
        score as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    fn facts(minutes: f64, paintings: u32, size: u32, vip: bool) -> VisitFacts {
        VisitFacts {
            simulated_minutes: minutes,
            paintings_seen: paintings,
            questions_asked: 0,
            group_size: size,
            is_vip: vip,
        }
    }

    fn quiet() -> SatisfactionModel {
        SatisfactionModel {
            noise: 0.0,
            ..SatisfactionModel::default()
        }
    }

    #[rstest]
    #[case::ideal_tour(facts(64.0, 8, 8, false), 5)]
    #[case::vip_ideal(facts(64.0, 8, 8, true), 5)]
    #[case::too_short(facts(10.0, 2, 8, false), 1)]
    #[case::crowded_long(facts(120.0, 8, 20, false), 2)]
    #[case::vip_too_long(facts(150.0, 8, 8, true), 2)]
    fn test_scores(#[case] facts: VisitFacts, #[case] expected: u8) {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(quiet().score(&facts, &mut rng), expected);
    }

    #[test]
    fn test_questions_bonus_is_capped() {
        let model = quiet();
        let mut many = facts(120.0, 6, 8, false);
        many.questions_asked = 50;
        let mut few = many;
        few.questions_asked = 5;
        assert_eq!(model.raw_score(&many), model.raw_score(&few));
    }

    proptest! {
        #[test]
        fn prop_score_always_in_range(
            minutes in 0.0f64..500.0,
            paintings in 0u32..20,
            questions in 0u32..20,
            size in 1u32..40,
            vip in any::<bool>(),
            seed in any::<u64>(),
        ) {
            let facts = VisitFacts {
                simulated_minutes: minutes,
                paintings_seen: paintings,
                questions_asked: questions,
                group_size: size,
                is_vip: vip,
            };
            let mut rng = StdRng::seed_from_u64(seed);
            let score = SatisfactionModel::default().score(&facts, &mut rng);
            prop_assert!((1..=5).contains(&score));
        }
    }
}
