//! Capabilities the interpreter borrows from the surrounding simulation.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

/// Object pools a script can address by integer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Character,
    Vehicle,
    Instance,
    Pickup,
    Cutscene,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectKind::Character => "character",
            ObjectKind::Vehicle => "vehicle",
            ObjectKind::Instance => "instance",
            ObjectKind::Pickup => "pickup",
            ObjectKind::Cutscene => "cutscene object",
        };
        f.write_str(label)
    }
}

/// A resolved, live world object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectHandle {
    pub kind: ObjectKind,
    pub id: u32,
}

pub trait World {
    fn object_exists(&self, kind: ObjectKind, id: u32) -> bool;

    /// Maps a model name from the container's model table to the world's
    /// numeric model id.
    fn find_model(&self, name: &str) -> Option<i32>;

    /// Registers an object for release when the current mission ends.
    fn add_mission_object(&mut self, handle: ObjectHandle);

    /// Called when a mission ends so objects it spawned can be released.
    fn release_mission_objects(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub trait GameState {
    /// Character controlled by `player`, if that player exists.
    fn player_character(&self, player: usize) -> Option<u32>;

    fn player_count(&self) -> usize;

    fn is_player_wasted_or_busted(&self) -> bool;
}

/// What `Machine::step` needs from the host, split into the two
/// capability sets.
pub trait Host {
    fn world(&mut self) -> &mut dyn World;

    fn game_state(&mut self) -> &mut dyn GameState;
}

/// In-memory world with no simulation behind it. Objects exist once
/// spawned and players are plain character ids.
#[derive(Debug, Clone, Default)]
pub struct HeadlessWorld {
    objects: BTreeMap<ObjectKind, BTreeSet<u32>>,
    mission_objects: Vec<ObjectHandle>,
    models: BTreeMap<String, i32>,
    players: Vec<u32>,
    next_id: u32,
    pub wasted_or_busted: bool,
    pub released_missions: usize,
}

impl HeadlessWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// A world with one player driving a freshly spawned character.
    pub fn with_player() -> Self {
        let mut world = Self::new();
        let character = world.spawn(ObjectKind::Character);
        world.players.push(character.id);
        world
    }

    pub fn spawn(&mut self, kind: ObjectKind) -> ObjectHandle {
        self.next_id += 1;
        let handle = ObjectHandle {
            kind,
            id: self.next_id,
        };
        self.objects.entry(kind).or_default().insert(handle.id);
        handle
    }

    pub fn despawn(&mut self, handle: ObjectHandle) -> bool {
        self.objects
            .get_mut(&handle.kind)
            .map(|pool| pool.remove(&handle.id))
            .unwrap_or(false)
    }

    pub fn add_model(&mut self, name: &str, id: i32) {
        self.models.insert(name.to_ascii_lowercase(), id);
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.objects.get(&kind).map(BTreeSet::len).unwrap_or(0)
    }
}

impl World for HeadlessWorld {
    fn object_exists(&self, kind: ObjectKind, id: u32) -> bool {
        self.objects
            .get(&kind)
            .map(|pool| pool.contains(&id))
            .unwrap_or(false)
    }

    fn find_model(&self, name: &str) -> Option<i32> {
        self.models.get(&name.to_ascii_lowercase()).copied()
    }

    fn add_mission_object(&mut self, handle: ObjectHandle) {
        self.mission_objects.push(handle);
    }

    fn release_mission_objects(&mut self) {
        for handle in std::mem::take(&mut self.mission_objects) {
            self.despawn(handle);
        }
        self.released_missions += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl GameState for HeadlessWorld {
    fn player_character(&self, player: usize) -> Option<u32> {
        self.players.get(player).copied()
    }

    fn player_count(&self) -> usize {
        self.players.len()
    }

    fn is_player_wasted_or_busted(&self) -> bool {
        self.wasted_or_busted
    }
}

impl Host for HeadlessWorld {
    fn world(&mut self) -> &mut dyn World {
        self
    }

    fn game_state(&mut self) -> &mut dyn GameState {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mission_objects_are_released_together() {
        let mut world = HeadlessWorld::with_player();
        let keep = world.spawn(ObjectKind::Vehicle);
        let temp = world.spawn(ObjectKind::Vehicle);
        let pickup = world.spawn(ObjectKind::Pickup);
        world.add_mission_object(temp);
        world.add_mission_object(pickup);

        world.release_mission_objects();
        assert!(world.object_exists(ObjectKind::Vehicle, keep.id));
        assert!(!world.object_exists(ObjectKind::Vehicle, temp.id));
        assert!(!world.object_exists(ObjectKind::Pickup, pickup.id));
        assert_eq!(world.released_missions, 1);
    }

    #[test]
    fn pools_are_separate() {
        let mut world = HeadlessWorld::new();
        let car = world.spawn(ObjectKind::Vehicle);
        assert!(!world.object_exists(ObjectKind::Character, car.id));
        assert_eq!(world.count(ObjectKind::Vehicle), 1);
    }

    #[test]
    fn model_names_ignore_case() {
        let mut world = HeadlessWorld::new();
        world.add_model("rd_Corner1", 4000);
        assert_eq!(world.find_model("RD_CORNER1"), Some(4000));
        assert_eq!(world.find_model("missing"), None);
    }

    #[test]
    fn host_downcasts_to_concrete_world() {
        let mut world = HeadlessWorld::with_player();
        let host: &mut dyn Host = &mut world;
        assert_eq!(host.game_state().player_count(), 1);
        let concrete = host
            .world()
            .as_any_mut()
            .downcast_mut::<HeadlessWorld>()
            .unwrap();
        concrete.wasted_or_busted = true;
        assert!(world.is_player_wasted_or_busted());
    }
}
