//! Farkle scoring combinations.

/// One scoring combination; of-a-kind variants carry the face value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combo {
    Single1,
    Single5,
    ThreeOfKind(u8),
    FourOfKind(u8),
    FiveOfKind(u8),
    SixOfKind(u8),
    SmallStraight,
    LargeStraight,
    ThreePairs,
    DoubleTriplets,
    FullHouse,
}

fn counts(dice: &[u8]) -> [usize; 7] {
    let mut counts = [0usize; 7];
    for &die in dice {
        if (1..=6).contains(&die) {
            counts[die as usize] += 1;
        }
    }
    counts
}

impl Combo {
    pub fn points(self) -> i64 {
        match self {
            Combo::Single1 => 10,
            Combo::Single5 => 5,
            Combo::ThreeOfKind(n) => {
                if n == 1 {
                    100
                } else {
                    i64::from(n) * 10
                }
            },
            Combo::FourOfKind(n) => {
                if n == 1 {
                    200
                } else {
                    i64::from(n) * 20
                }
            },
            Combo::FiveOfKind(n) => {
                if n == 1 {
                    400
                } else {
                    i64::from(n) * 40
                }
            },
            Combo::SixOfKind(n) => {
                if n == 1 {
                    800
                } else {
                    i64::from(n) * 80
                }
            },
            Combo::SmallStraight => 100,
            Combo::LargeStraight => 200,
            Combo::ThreePairs => 150,
            Combo::DoubleTriplets => 250,
            Combo::FullHouse => 150,
        }
    }

    /// The action id this combo appears under in the turn menu.
    pub fn action_id(self) -> String {
        match self {
            Combo::Single1 => "score_single_1".to_string(),
            Combo::Single5 => "score_single_5".to_string(),
            Combo::ThreeOfKind(n) => format!("score_three_of_kind_{n}"),
            Combo::FourOfKind(n) => format!("score_four_of_kind_{n}"),
            Combo::FiveOfKind(n) => format!("score_five_of_kind_{n}"),
            Combo::SixOfKind(n) => format!("score_six_of_kind_{n}"),
            Combo::SmallStraight => "score_small_straight".to_string(),
            Combo::LargeStraight => "score_large_straight".to_string(),
            Combo::ThreePairs => "score_three_pairs".to_string(),
            Combo::DoubleTriplets => "score_double_triplets".to_string(),
            Combo::FullHouse => "score_full_house".to_string(),
        }
    }

    pub fn from_action_id(id: &str) -> Option<Self> {
        let rest = id.strip_prefix("score_")?;
        let of_kind = |rest: &str, prefix: &str| -> Option<u8> {
            rest.strip_prefix(prefix)?.parse().ok().filter(|n| (1..=6).contains(n))
        };
        match rest {
            "single_1" => Some(Combo::Single1),
            "single_5" => Some(Combo::Single5),
            "small_straight" => Some(Combo::SmallStraight),
            "large_straight" => Some(Combo::LargeStraight),
            "three_pairs" => Some(Combo::ThreePairs),
            "double_triplets" => Some(Combo::DoubleTriplets),
            "full_house" => Some(Combo::FullHouse),
            _ => of_kind(rest, "three_of_kind_")
                .map(Combo::ThreeOfKind)
                .or_else(|| of_kind(rest, "four_of_kind_").map(Combo::FourOfKind))
                .or_else(|| of_kind(rest, "five_of_kind_").map(Combo::FiveOfKind))
                .or_else(|| of_kind(rest, "six_of_kind_").map(Combo::SixOfKind)),
        }
    }

    /// English display name, used in announcements and menu labels.
    pub fn name(self) -> String {
        match self {
            Combo::Single1 => "Single 1".to_string(),
            Combo::Single5 => "Single 5".to_string(),
            Combo::ThreeOfKind(n) => format!("Three {n}s"),
            Combo::FourOfKind(n) => format!("Four {n}s"),
            Combo::FiveOfKind(n) => format!("Five {n}s"),
            Combo::SixOfKind(n) => format!("Six {n}s"),
            Combo::SmallStraight => "Small Straight".to_string(),
            Combo::LargeStraight => "Large Straight".to_string(),
            Combo::ThreePairs => "Three pairs".to_string(),
            Combo::DoubleTriplets => "Double triplets".to_string(),
            Combo::FullHouse => "Full house".to_string(),
        }
    }

    pub fn sound(self) -> &'static str {
        match self {
            Combo::Single1 => "game_farkle/point10.ogg",
            Combo::Single5 => "game_farkle/singles5.ogg",
            Combo::ThreeOfKind(_) => "game_farkle/3kind.ogg",
            Combo::FourOfKind(_) => "game_farkle/4kind.ogg",
            Combo::FiveOfKind(_) => "game_farkle/5kind.ogg",
            Combo::SixOfKind(_) => "game_farkle/6kind.ogg",
            Combo::SmallStraight => "game_farkle/smallstraight.ogg",
            Combo::LargeStraight => "game_farkle/largestraight.ogg",
            Combo::ThreePairs => "game_farkle/3pairs.ogg",
            Combo::DoubleTriplets => "game_farkle/doubletriplets.ogg",
            Combo::FullHouse => "game_farkle/fullhouse.ogg",
        }
    }

    pub fn is_present(self, dice: &[u8]) -> bool {
        let counts = counts(dice);
        match self {
            Combo::Single1 => counts[1] >= 1,
            Combo::Single5 => counts[5] >= 1,
            Combo::ThreeOfKind(n) => counts[n as usize] >= 3,
            Combo::FourOfKind(n) => counts[n as usize] >= 4,
            Combo::FiveOfKind(n) => counts[n as usize] >= 5,
            Combo::SixOfKind(n) => counts[n as usize] == 6,
            Combo::LargeStraight => dice.len() == 6 && (1..=6).all(|i| counts[i] == 1),
            Combo::SmallStraight => {
                dice.len() >= 5
                    && ((1..=5).all(|i| counts[i] >= 1) || (2..=6).all(|i| counts[i] >= 1))
            },
            Combo::ThreePairs => {
                dice.len() == 6 && (1..=6).filter(|&i| counts[i] == 2).count() == 3
            },
            Combo::DoubleTriplets => {
                dice.len() == 6 && (1..=6).filter(|&i| counts[i] == 3).count() == 2
            },
            Combo::FullHouse => {
                dice.len() == 6
                    && (1..=6).any(|i| counts[i] == 4)
                    && (1..=6).any(|i| counts[i] == 2)
            },
        }
    }

    /// Move this combo's dice from `roll` into `taken`.
    pub fn remove_dice(self, roll: &mut Vec<u8>, taken: &mut Vec<u8>) {
        let small_straight_needed: [u8; 5] = {
            let c = counts(roll);
            if (1..=5).all(|i| c[i] >= 1) { [1, 2, 3, 4, 5] } else { [2, 3, 4, 5, 6] }
        };
        let mut remove_n = |value: u8, n: usize| {
            for _ in 0..n {
                if let Some(pos) = roll.iter().position(|&d| d == value) {
                    roll.remove(pos);
                    taken.push(value);
                }
            }
        };
        match self {
            Combo::Single1 => remove_n(1, 1),
            Combo::Single5 => remove_n(5, 1),
            Combo::ThreeOfKind(n) => remove_n(n, 3),
            Combo::FourOfKind(n) => remove_n(n, 4),
            Combo::FiveOfKind(n) => remove_n(n, 5),
            Combo::SixOfKind(n) => remove_n(n, 6),
            Combo::SmallStraight => {
                for value in small_straight_needed {
                    remove_n(value, 1);
                }
            },
            Combo::LargeStraight | Combo::ThreePairs | Combo::DoubleTriplets | Combo::FullHouse => {
                taken.append(roll);
            },
        }
    }
}

/// Does the roll contain anything worth taking? An empty answer is a
/// farkle.
pub fn has_scoring_dice(dice: &[u8]) -> bool {
    !available_combos(dice).is_empty()
}

/// All combos present in the roll with their points, best first.
pub fn available_combos(dice: &[u8]) -> Vec<(Combo, i64)> {
    if dice.is_empty() {
        return Vec::new();
    }
    let mut found = Vec::new();
    for n in 1..=6 {
        for combo in [
            Combo::SixOfKind(n),
            Combo::FiveOfKind(n),
            Combo::FourOfKind(n),
            Combo::ThreeOfKind(n),
        ] {
            if combo.is_present(dice) {
                found.push(combo);
            }
        }
    }
    for combo in [
        Combo::LargeStraight,
        Combo::SmallStraight,
        Combo::DoubleTriplets,
        Combo::FullHouse,
        Combo::ThreePairs,
        Combo::Single1,
        Combo::Single5,
    ] {
        if combo.is_present(dice) {
            found.push(combo);
        }
    }
    let mut with_points: Vec<(Combo, i64)> =
        found.into_iter().map(|combo| (combo, combo.points())).collect();
    with_points.sort_by_key(|(_, points)| std::cmp::Reverse(*points));
    with_points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_values_match_the_scoring_table() {
        assert_eq!(Combo::Single1.points(), 10);
        assert_eq!(Combo::Single5.points(), 5);
        assert_eq!(Combo::ThreeOfKind(1).points(), 100);
        assert_eq!(Combo::ThreeOfKind(4).points(), 40);
        assert_eq!(Combo::SixOfKind(6).points(), 480);
        assert_eq!(Combo::LargeStraight.points(), 200);
        assert_eq!(Combo::ThreePairs.points(), 150);
    }

    #[test]
    fn farkle_detection() {
        assert!(!has_scoring_dice(&[2, 3, 4, 6]));
        assert!(has_scoring_dice(&[2, 3, 4, 5]));
        assert!(has_scoring_dice(&[1]));
        assert!(has_scoring_dice(&[2, 2, 2]));
        assert!(!has_scoring_dice(&[]));
    }

    #[test]
    fn straights_require_exact_shapes() {
        assert!(Combo::LargeStraight.is_present(&[1, 2, 3, 4, 5, 6]));
        assert!(!Combo::LargeStraight.is_present(&[1, 2, 3, 4, 5]));
        assert!(Combo::SmallStraight.is_present(&[1, 2, 3, 4, 5]));
        assert!(Combo::SmallStraight.is_present(&[2, 3, 4, 5, 6, 6]));
        assert!(!Combo::SmallStraight.is_present(&[1, 2, 3, 4, 6]));
    }

    #[test]
    fn three_pairs_and_double_triplets() {
        assert!(Combo::ThreePairs.is_present(&[2, 2, 3, 3, 6, 6]));
        assert!(!Combo::ThreePairs.is_present(&[2, 2, 2, 3, 6, 6]));
        assert!(Combo::DoubleTriplets.is_present(&[2, 2, 2, 5, 5, 5]));
        assert!(Combo::FullHouse.is_present(&[4, 4, 4, 4, 2, 2]));
    }

    #[test]
    fn combos_sorted_by_points_descending() {
        let combos = available_combos(&[1, 1, 1, 5, 2, 3]);
        assert_eq!(combos.first().map(|(c, _)| *c), Some(Combo::ThreeOfKind(1)));
        let points: Vec<i64> = combos.iter().map(|(_, p)| *p).collect();
        let mut sorted = points.clone();
        sorted.sort_by_key(|p| std::cmp::Reverse(*p));
        assert_eq!(points, sorted);
    }

    #[test]
    fn action_ids_round_trip() {
        for combo in [
            Combo::Single1,
            Combo::Single5,
            Combo::ThreeOfKind(4),
            Combo::SixOfKind(1),
            Combo::SmallStraight,
            Combo::LargeStraight,
            Combo::ThreePairs,
            Combo::DoubleTriplets,
            Combo::FullHouse,
        ] {
            assert_eq!(Combo::from_action_id(&combo.action_id()), Some(combo));
        }
        assert_eq!(Combo::from_action_id("score_bogus"), None);
        assert_eq!(Combo::from_action_id("roll"), None);
    }

    #[test]
    fn remove_dice_moves_the_right_dice() {
        let mut roll = vec![1, 3, 3, 3, 5, 6];
        let mut taken = Vec::new();
        Combo::ThreeOfKind(3).remove_dice(&mut roll, &mut taken);
        assert_eq!(roll, vec![1, 5, 6]);
        assert_eq!(taken, vec![3, 3, 3]);

        Combo::Single1.remove_dice(&mut roll, &mut taken);
        assert_eq!(roll, vec![5, 6]);

        let mut straight = vec![1, 2, 3, 4, 5, 3];
        let mut taken = Vec::new();
        Combo::SmallStraight.remove_dice(&mut straight, &mut taken);
        assert_eq!(straight, vec![3]);
        assert_eq!(taken.len(), 5);
    }
}
