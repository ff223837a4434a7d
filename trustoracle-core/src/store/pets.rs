//! Pet state persistence and idempotent transitions.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::chain::PetSnapshot;
use crate::pet;

use super::models::{PetState, PetUpdate};
use super::{Result, Store, StoreError};

const DEFAULT_COLOR: &str = "blue";

impl Store {
    /// Fetch the device's pet, creating it with defaults on first
    /// access. Time-based decay is applied on every read and persisted.
    pub fn get_or_create_pet(&self, device_id: &str, name: &str, now: i64) -> Result<PetState> {
        let conn = self.conn()?;
        self.require_device(&conn, device_id)?;

        if let Some(mut pet) = query_pet(&conn, device_id)? {
            if pet::apply_decay(&mut pet, now) {
                write_pet(&conn, &pet)?;
            }
            return Ok(pet);
        }

        conn.execute(
            "INSERT INTO pets (device_id, pet_name, created_at, last_fed, last_played, color)
             VALUES (?1, ?2, ?3, ?3, ?3, ?4)",
            params![device_id, name, now, DEFAULT_COLOR],
        )?;
        query_pet(&conn, device_id)?
            .ok_or_else(|| StoreError::Internal(format!("pet for {} vanished", device_id)))
    }

    /// Pet lookup without creation (management projections).
    pub fn find_pet(&self, device_id: &str) -> Result<Option<PetState>> {
        let conn = self.conn()?;
        query_pet(&conn, device_id)
    }

    /// Apply a device-pushed stat sync. Bounded fields clamp into
    /// 0..=100, level into 0..=4; counters never go negative.
    pub fn update_pet(&self, device_id: &str, update: &PetUpdate, now: i64) -> Result<PetState> {
        let conn = self.conn()?;
        self.require_device(&conn, device_id)?;
        let mut pet = match query_pet(&conn, device_id)? {
            Some(pet) => pet,
            None => self.insert_default(&conn, device_id, now)?,
        };

        if let Some(v) = update.happiness {
            pet.happiness = pet::clamp_status(v);
        }
        if let Some(v) = update.hunger {
            pet.hunger = pet::clamp_status(v);
        }
        if let Some(v) = update.health {
            pet.health = pet::clamp_status(v);
        }
        if let Some(v) = update.experience {
            pet.experience = v.max(0);
        }
        if let Some(v) = update.total_steps_fed {
            pet.total_steps_fed = v.max(0);
        }
        if let Some(v) = update.level {
            pet.level = v.clamp(0, 4) as u8;
        }
        if let Some(v) = update.food {
            pet.food = v.max(0);
        }
        if let Some(v) = update.energy {
            pet.energy = v.max(0);
        }

        write_pet(&conn, &pet)?;
        Ok(pet)
    }

    /// Credit claimed resources.
    pub fn add_resources(&self, device_id: &str, food: i64, energy: i64, now: i64) -> Result<PetState> {
        let conn = self.conn()?;
        self.require_device(&conn, device_id)?;
        let mut pet = match query_pet(&conn, device_id)? {
            Some(pet) => pet,
            None => self.insert_default(&conn, device_id, now)?,
        };

        pet.food += food.max(0);
        pet.energy += energy.max(0);
        write_pet(&conn, &pet)?;
        Ok(pet)
    }

    /// Consume one food and apply the feed transition. Returns the
    /// updated pet and whether it leveled up.
    pub fn consume_and_apply_feed(&self, device_id: &str, now: i64) -> Result<(PetState, bool)> {
        let conn = self.conn()?;
        self.require_device(&conn, device_id)?;
        let mut pet = match query_pet(&conn, device_id)? {
            Some(pet) => pet,
            None => self.insert_default(&conn, device_id, now)?,
        };

        pet::apply_decay(&mut pet, now);
        if pet.food < 1 {
            // Persist the decay even though the feed is refused.
            write_pet(&conn, &pet)?;
            return Err(StoreError::NoFood);
        }

        pet.food -= 1;
        let evolved = pet::apply_feed(&mut pet, now);
        write_pet(&conn, &pet)?;
        Ok((pet, evolved))
    }

    /// Consume one energy and apply the play transition.
    pub fn consume_and_apply_play(&self, device_id: &str, now: i64) -> Result<PetState> {
        let conn = self.conn()?;
        self.require_device(&conn, device_id)?;
        let mut pet = match query_pet(&conn, device_id)? {
            Some(pet) => pet,
            None => self.insert_default(&conn, device_id, now)?,
        };

        pet::apply_decay(&mut pet, now);
        if pet.energy < 1 {
            write_pet(&conn, &pet)?;
            return Err(StoreError::NoEnergy);
        }

        pet.energy -= 1;
        pet::apply_play(&mut pet, now);
        write_pet(&conn, &pet)?;
        Ok(pet)
    }

    /// Adopt an authoritative chain snapshot: bounded statuses always
    /// overwrite local state, optional counters overwrite when present.
    pub fn adopt_chain_snapshot(&self, device_id: &str, snapshot: &PetSnapshot) -> Result<PetState> {
        let conn = self.conn()?;
        let mut pet = query_pet(&conn, device_id)?
            .ok_or_else(|| StoreError::UnknownDevice(device_id.to_string()))?;

        pet.happiness = pet::clamp_status(snapshot.happiness);
        pet.hunger = pet::clamp_status(snapshot.hunger);
        pet.health = pet::clamp_status(snapshot.health);
        if let Some(food) = snapshot.food {
            pet.food = food.max(0);
        }
        if let Some(energy) = snapshot.energy {
            pet.energy = energy.max(0);
        }
        if let Some(level) = snapshot.level {
            pet.level = level.clamp(0, 4) as u8;
        }
        if let Some(experience) = snapshot.experience {
            pet.experience = experience.max(0);
        }

        write_pet(&conn, &pet)?;
        Ok(pet)
    }

    /// Record the handle the chain assigned to this pet.
    pub fn set_chain_pet_id(&self, device_id: &str, chain_pet_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE pets SET chain_pet_id = ?1 WHERE device_id = ?2",
            params![chain_pet_id, device_id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownDevice(device_id.to_string()));
        }
        Ok(())
    }

    fn require_device(&self, conn: &Connection, device_id: &str) -> Result<()> {
        let known: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM devices WHERE device_id = ?1)",
            params![device_id],
            |row| row.get(0),
        )?;
        if !known {
            return Err(StoreError::UnknownDevice(device_id.to_string()));
        }
        Ok(())
    }

    fn insert_default(&self, conn: &Connection, device_id: &str, now: i64) -> Result<PetState> {
        conn.execute(
            "INSERT INTO pets (device_id, pet_name, created_at, last_fed, last_played, color)
             VALUES (?1, 'Pet', ?2, ?2, ?2, ?3)",
            params![device_id, now, DEFAULT_COLOR],
        )?;
        query_pet(conn, device_id)?
            .ok_or_else(|| StoreError::Internal(format!("pet for {} vanished", device_id)))
    }
}

fn query_pet(conn: &Connection, device_id: &str) -> Result<Option<PetState>> {
    let pet = conn
        .query_row(
            "SELECT id, device_id, pet_name, level, experience, total_steps_fed,
                    happiness, hunger, health, food, energy, created_at,
                    last_fed, last_played, color, chain_pet_id
             FROM pets WHERE device_id = ?1",
            params![device_id],
            pet_from_row,
        )
        .optional()?;
    Ok(pet)
}

fn write_pet(conn: &Connection, pet: &PetState) -> Result<()> {
    conn.execute(
        "UPDATE pets SET pet_name = ?1, level = ?2, experience = ?3, total_steps_fed = ?4,
                         happiness = ?5, hunger = ?6, health = ?7, food = ?8, energy = ?9,
                         last_fed = ?10, last_played = ?11, color = ?12
         WHERE id = ?13",
        params![
            pet.pet_name,
            pet.level,
            pet.experience,
            pet.total_steps_fed,
            pet.happiness,
            pet.hunger,
            pet.health,
            pet.food,
            pet.energy,
            pet.last_fed,
            pet.last_played,
            pet.color,
            pet.id,
        ],
    )?;
    Ok(())
}

fn pet_from_row(row: &Row<'_>) -> rusqlite::Result<PetState> {
    Ok(PetState {
        id: row.get(0)?,
        device_id: row.get(1)?,
        pet_name: row.get(2)?,
        level: row.get(3)?,
        experience: row.get(4)?,
        total_steps_fed: row.get(5)?,
        happiness: row.get(6)?,
        hunger: row.get(7)?,
        health: row.get(8)?,
        food: row.get(9)?,
        energy: row.get(10)?,
        created_at: row.get(11)?,
        last_fed: row.get(12)?,
        last_played: row.get(13)?,
        color: row.get(14)?,
        chain_pet_id: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        let store = Store::in_memory().unwrap();
        store.register_device("d1", &[1u8; 32]).unwrap();
        store
    }

    #[test]
    fn create_with_defaults() {
        let store = store();
        let pet = store.get_or_create_pet("d1", "Pixel", 1_000).unwrap();
        assert_eq!(pet.pet_name, "Pixel");
        assert_eq!(pet.level, 0);
        assert_eq!(pet.happiness, 50);
        assert_eq!(pet.hunger, 50);
        assert_eq!(pet.health, 100);
        assert_eq!(pet.food, 5);
        assert_eq!(pet.energy, 5);
        assert_eq!(pet.color.as_deref(), Some("blue"));

        // Second access returns the same pet, not a new one.
        let again = store.get_or_create_pet("d1", "Other", 1_000).unwrap();
        assert_eq!(again.id, pet.id);
        assert_eq!(again.pet_name, "Pixel");
    }

    #[test]
    fn pet_requires_device() {
        let store = Store::in_memory().unwrap();
        let err = store.get_or_create_pet("ghost", "Pet", 0).unwrap_err();
        assert!(matches!(err, StoreError::UnknownDevice(_)));
    }

    #[test]
    fn decay_is_persisted_on_read() {
        let store = store();
        store.get_or_create_pet("d1", "Pet", 0).unwrap();
        let pet = store.get_or_create_pet("d1", "Pet", 3_600).unwrap();
        assert_eq!(pet.hunger, 49);

        // Re-reading at the same instant does not decay again.
        let pet = store.get_or_create_pet("d1", "Pet", 3_600).unwrap();
        assert_eq!(pet.hunger, 49);
    }

    #[test]
    fn update_clamps_bounds() {
        let store = store();
        store.get_or_create_pet("d1", "Pet", 0).unwrap();
        let update = PetUpdate {
            happiness: Some(300),
            hunger: Some(-5),
            health: Some(101),
            level: Some(9),
            food: Some(-2),
            experience: Some(-10),
            ..Default::default()
        };
        let pet = store.update_pet("d1", &update, 0).unwrap();
        assert_eq!(pet.happiness, 100);
        assert_eq!(pet.hunger, 0);
        assert_eq!(pet.health, 100);
        assert_eq!(pet.level, 4);
        assert_eq!(pet.food, 0);
        assert_eq!(pet.experience, 0);
    }

    #[test]
    fn feed_consumes_food_and_levels() {
        let store = store();
        store.get_or_create_pet("d1", "Pet", 0).unwrap();

        let (pet, evolved) = store.consume_and_apply_feed("d1", 10).unwrap();
        assert!(!evolved);
        assert_eq!(pet.food, 4);
        assert_eq!(pet.hunger, 75);
        assert_eq!(pet.experience, 10);
        assert_eq!(pet.last_fed, 10);
    }

    #[test]
    fn feed_without_food_is_refused() {
        let store = store();
        store.get_or_create_pet("d1", "Pet", 0).unwrap();
        store
            .update_pet(
                "d1",
                &PetUpdate {
                    food: Some(0),
                    ..Default::default()
                },
                0,
            )
            .unwrap();

        let err = store.consume_and_apply_feed("d1", 10).unwrap_err();
        assert!(matches!(err, StoreError::NoFood));
        let pet = store.find_pet("d1").unwrap().unwrap();
        assert_eq!(pet.experience, 0);
    }

    #[test]
    fn play_consumes_energy() {
        let store = store();
        store.get_or_create_pet("d1", "Pet", 0).unwrap();

        let pet = store.consume_and_apply_play("d1", 10).unwrap();
        assert_eq!(pet.energy, 4);
        assert_eq!(pet.happiness, 65);
        assert_eq!(pet.experience, 5);

        store
            .update_pet(
                "d1",
                &PetUpdate {
                    energy: Some(0),
                    ..Default::default()
                },
                10,
            )
            .unwrap();
        let err = store.consume_and_apply_play("d1", 20).unwrap_err();
        assert!(matches!(err, StoreError::NoEnergy));
    }

    #[test]
    fn resources_accumulate() {
        let store = store();
        store.get_or_create_pet("d1", "Pet", 0).unwrap();
        let pet = store.add_resources("d1", 3, 4, 0).unwrap();
        assert_eq!(pet.food, 8);
        assert_eq!(pet.energy, 9);
    }

    #[test]
    fn chain_snapshot_overwrites_bounded_fields() {
        let store = store();
        store.get_or_create_pet("d1", "Pet", 0).unwrap();

        let snapshot = PetSnapshot {
            happiness: 90,
            hunger: 180, // clamped
            health: 70,
            food: Some(11),
            energy: None,
            level: Some(2),
            experience: Some(600),
        };
        let pet = store.adopt_chain_snapshot("d1", &snapshot).unwrap();
        assert_eq!(pet.happiness, 90);
        assert_eq!(pet.hunger, 100);
        assert_eq!(pet.health, 70);
        assert_eq!(pet.food, 11);
        assert_eq!(pet.energy, 5); // untouched
        assert_eq!(pet.level, 2);
        assert_eq!(pet.experience, 600);
    }

    #[test]
    fn chain_pet_handle_round_trip() {
        let store = store();
        store.get_or_create_pet("d1", "Pet", 0).unwrap();
        store.set_chain_pet_id("d1", "0xpet").unwrap();
        let pet = store.find_pet("d1").unwrap().unwrap();
        assert_eq!(pet.chain_pet_id.as_deref(), Some("0xpet"));
    }
}
