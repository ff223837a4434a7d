//! Derived pet state rules.
//!
//! Pure arithmetic shared by the store and the orchestrator: time-based
//! decay, resource claims, feed/play transitions and the experience to
//! level mapping. All bounded statuses clamp into 0..=100 before they
//! are persisted.

use crate::store::models::PetState;

/// Experience thresholds for levels 1..=4.
pub const LEVEL_THRESHOLDS: [i64; 4] = [100, 500, 2_000, 5_000];

pub const STATUS_MAX: i64 = 100;

const HUNGER_DECAY_SECS: i64 = 3_600;
const HAPPINESS_DECAY_SECS: i64 = 7_200;

/// Level is a monotonic function of experience.
pub fn level_for_experience(experience: i64) -> u8 {
    LEVEL_THRESHOLDS
        .iter()
        .take_while(|t| experience >= **t)
        .count() as u8
}

pub fn clamp_status(value: i64) -> u8 {
    value.clamp(0, STATUS_MAX) as u8
}

/// Apply whole elapsed decay periods to a pet in place.
///
/// Hunger loses one point per whole hour since `last_fed`; happiness
/// one point per whole two hours since `last_played`. The timers
/// advance by exactly the consumed periods so the fractional remainder
/// carries into the next read and repeated reads never compound.
/// Health adjusts once per read, and only when a period elapsed, so
/// polling alone cannot drain or inflate it.
///
/// Returns `true` if anything changed and needs to be persisted.
pub fn apply_decay(pet: &mut PetState, now: i64) -> bool {
    let hunger_periods = (now - pet.last_fed).max(0) / HUNGER_DECAY_SECS;
    let play_periods = (now - pet.last_played).max(0) / HAPPINESS_DECAY_SECS;

    if hunger_periods == 0 && play_periods == 0 {
        return false;
    }

    if hunger_periods > 0 {
        pet.hunger = clamp_status(pet.hunger as i64 - hunger_periods);
        pet.last_fed += hunger_periods * HUNGER_DECAY_SECS;
    }
    if play_periods > 0 {
        pet.happiness = clamp_status(pet.happiness as i64 - play_periods);
        pet.last_played += play_periods * HAPPINESS_DECAY_SECS;
    }

    if pet.hunger < 20 || pet.happiness < 20 {
        pet.health = clamp_status(pet.health as i64 - 1);
    } else if pet.hunger > 80 && pet.happiness > 80 {
        pet.health = clamp_status(pet.health as i64 + 1);
    }

    true
}

/// Resources gained from a claim of `steps` steps.
///
/// One food per 100 steps, two energy per 150 steps.
pub fn claim_gains(steps: u32) -> (i64, i64) {
    let food = (steps / 100) as i64;
    let energy = 2 * (steps / 150) as i64;
    (food, energy)
}

/// Minimum step count for a resource claim.
pub const CLAIM_MIN_STEPS: u32 = 100;

/// Feed transition. The caller has already checked and decremented the
/// food counter; this applies the stat changes and re-evaluates level.
/// Returns `true` if the pet leveled up.
pub fn apply_feed(pet: &mut PetState, now: i64) -> bool {
    pet.hunger = clamp_status(pet.hunger as i64 + 25);
    pet.happiness = clamp_status(pet.happiness as i64 + 5);
    pet.experience += 10;
    pet.total_steps_fed += 100;
    pet.last_fed = now;

    let new_level = level_for_experience(pet.experience);
    let evolved = new_level > pet.level;
    pet.level = new_level;
    evolved
}

/// Play transition, after the energy counter has been consumed.
pub fn apply_play(pet: &mut PetState, now: i64) {
    pet.happiness = clamp_status(pet.happiness as i64 + 15);
    pet.health = clamp_status(pet.health as i64 + 3);
    pet.experience += 5;
    pet.last_played = now;
    pet.level = level_for_experience(pet.experience);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pet() -> PetState {
        PetState {
            id: 1,
            device_id: "d1".to_string(),
            pet_name: "Pet".to_string(),
            level: 0,
            experience: 0,
            total_steps_fed: 0,
            happiness: 50,
            hunger: 50,
            health: 100,
            food: 5,
            energy: 5,
            created_at: 0,
            last_fed: 0,
            last_played: 0,
            color: Some("blue".to_string()),
            chain_pet_id: None,
        }
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(level_for_experience(0), 0);
        assert_eq!(level_for_experience(99), 0);
        assert_eq!(level_for_experience(100), 1);
        assert_eq!(level_for_experience(499), 1);
        assert_eq!(level_for_experience(500), 2);
        assert_eq!(level_for_experience(2_000), 3);
        assert_eq!(level_for_experience(5_000), 4);
        assert_eq!(level_for_experience(1_000_000), 4);
    }

    #[test]
    fn decay_one_hour_costs_one_hunger() {
        let mut p = pet();
        assert!(apply_decay(&mut p, 3_600));
        assert_eq!(p.hunger, 49);
        assert_eq!(p.happiness, 50);
        assert_eq!(p.last_fed, 3_600);
    }

    #[test]
    fn decay_keeps_fractional_remainder() {
        let mut p = pet();
        // 1h30m: one whole hour consumed, 30m carried.
        assert!(apply_decay(&mut p, 5_400));
        assert_eq!(p.hunger, 49);
        assert_eq!(p.last_fed, 3_600);

        // 40 more minutes completes the second hour.
        assert!(apply_decay(&mut p, 7_800));
        assert_eq!(p.hunger, 48);
    }

    #[test]
    fn decay_within_period_changes_nothing() {
        let mut p = pet();
        assert!(!apply_decay(&mut p, 3_599));
        assert_eq!(p.hunger, 50);
        assert_eq!(p.last_fed, 0);
    }

    #[test]
    fn repeated_reads_do_not_compound() {
        let mut p = pet();
        apply_decay(&mut p, 3_600);
        let hunger = p.hunger;
        assert!(!apply_decay(&mut p, 3_600));
        assert!(!apply_decay(&mut p, 3_700));
        assert_eq!(p.hunger, hunger);
    }

    #[test]
    fn happiness_decays_every_two_hours() {
        let mut p = pet();
        apply_decay(&mut p, 4 * 3_600);
        assert_eq!(p.happiness, 48);
        assert_eq!(p.hunger, 46);
    }

    #[test]
    fn hunger_floors_at_zero() {
        let mut p = pet();
        p.hunger = 2;
        apply_decay(&mut p, 100 * 3_600);
        assert_eq!(p.hunger, 0);
    }

    #[test]
    fn low_stats_drain_health() {
        let mut p = pet();
        p.hunger = 15;
        p.happiness = 50;
        apply_decay(&mut p, 3_600);
        assert_eq!(p.health, 99);
    }

    #[test]
    fn high_stats_restore_health() {
        let mut p = pet();
        p.hunger = 95;
        p.happiness = 95;
        p.health = 90;
        apply_decay(&mut p, 3_600);
        assert_eq!(p.health, 91);
    }

    #[test]
    fn health_capped_at_hundred() {
        let mut p = pet();
        p.hunger = 95;
        p.happiness = 95;
        apply_decay(&mut p, 3_600);
        assert_eq!(p.health, 100);
    }

    #[test]
    fn claim_gain_arithmetic() {
        assert_eq!(claim_gains(100), (1, 0));
        assert_eq!(claim_gains(150), (1, 2));
        assert_eq!(claim_gains(299), (2, 2));
        assert_eq!(claim_gains(300), (3, 4));
        assert_eq!(claim_gains(1_000), (10, 12));
    }

    #[test]
    fn feed_raises_stats_and_experience() {
        let mut p = pet();
        p.hunger = 90;
        let evolved = apply_feed(&mut p, 1_000);
        assert!(!evolved);
        assert_eq!(p.hunger, 100); // clamped
        assert_eq!(p.happiness, 55);
        assert_eq!(p.experience, 10);
        assert_eq!(p.total_steps_fed, 100);
        assert_eq!(p.last_fed, 1_000);
    }

    #[test]
    fn feed_across_threshold_evolves() {
        let mut p = pet();
        p.experience = 95;
        assert!(apply_feed(&mut p, 0));
        assert_eq!(p.level, 1);
    }

    #[test]
    fn play_raises_happiness_and_health() {
        let mut p = pet();
        p.health = 95;
        apply_play(&mut p, 2_000);
        assert_eq!(p.happiness, 65);
        assert_eq!(p.health, 98);
        assert_eq!(p.experience, 5);
        assert_eq!(p.last_played, 2_000);
    }
}
