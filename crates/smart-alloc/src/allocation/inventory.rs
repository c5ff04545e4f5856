//! Run-scoped view of available rooms, partitioned by hostel gender type.
//!
//! The snapshot is an arena of room copies taken once per run. The engine mutates it as it
//! commits placements so later applicants see the updated availability without re-reading
//! storage.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use super::domain::{Gender, Hostel, HostelGenderType, HostelId, PlacementFailure, Room};

/// A room together with the hostel it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSlot {
    pub room: Room,
    pub hostel: Hostel,
}

impl RoomSlot {
    fn has_free_bed(&self) -> bool {
        self.room.is_available() && self.room.first_free_bed().is_some()
    }
}

/// Index of a room inside an [`InventorySnapshot`].
pub type SlotIndex = usize;

#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    slots: Vec<RoomSlot>,
    buckets: BTreeMap<HostelGenderType, Vec<SlotIndex>>,
}

impl InventorySnapshot {
    /// Keeps rooms that are active, not under maintenance and not full. Each bucket is
    /// ordered accessible-first, then by room number (room id breaks remaining ties).
    pub fn build(hostels: Vec<Hostel>, rooms: Vec<Room>) -> Self {
        let hostels: HashMap<HostelId, Hostel> = hostels
            .into_iter()
            .map(|hostel| (hostel.id.clone(), hostel))
            .collect();

        let mut snapshot = InventorySnapshot::default();
        for room in rooms {
            if !room.is_available() {
                continue;
            }
            let Some(hostel) = hostels.get(&room.hostel_id) else {
                warn!(room_id = %room.id, hostel_id = %room.hostel_id, "room references unknown hostel, skipping");
                continue;
            };

            let index = snapshot.slots.len();
            snapshot
                .buckets
                .entry(hostel.gender_type)
                .or_default()
                .push(index);
            snapshot.slots.push(RoomSlot {
                room,
                hostel: hostel.clone(),
            });
        }

        let slots = &snapshot.slots;
        for bucket in snapshot.buckets.values_mut() {
            bucket.sort_by(|a, b| {
                let (a, b) = (&slots[*a].room, &slots[*b].room);
                (!a.is_accessible, &a.room_number, &a.id).cmp(&(
                    !b.is_accessible,
                    &b.room_number,
                    &b.id,
                ))
            });
        }

        snapshot
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: SlotIndex) -> &RoomSlot {
        &self.slots[index]
    }

    /// Rooms that are still available, per gender bucket, in selection order.
    pub fn available_rooms(&self) -> BTreeMap<HostelGenderType, Vec<&Room>> {
        self.buckets
            .iter()
            .map(|(gender_type, indices)| {
                let rooms = indices
                    .iter()
                    .map(|index| &self.slots[*index].room)
                    .filter(|room| room.is_available())
                    .collect();
                (*gender_type, rooms)
            })
            .collect()
    }

    /// Ordered candidate rooms for an applicant.
    ///
    /// Accessibility and hostel preference only narrow the set when the narrowed set is
    /// non-empty; neither is a hard constraint.
    pub fn candidates(
        &self,
        gender: Gender,
        needs_accessible: bool,
        preferred_hostel: Option<&HostelId>,
    ) -> Result<Vec<SlotIndex>, PlacementFailure> {
        let in_buckets: Vec<SlotIndex> = HostelGenderType::eligible_for(gender)
            .iter()
            .filter_map(|gender_type| self.buckets.get(gender_type))
            .flatten()
            .copied()
            .collect();

        if in_buckets.is_empty() {
            return Err(PlacementFailure::NoEligibleRoom);
        }

        let mut eligible: Vec<SlotIndex> = in_buckets
            .into_iter()
            .filter(|index| self.slots[*index].has_free_bed())
            .collect();

        if eligible.is_empty() {
            return Err(PlacementFailure::NoAvailableBed);
        }

        if needs_accessible {
            narrow(&mut eligible, |index| self.slots[index].room.is_accessible);
        }

        if let Some(preferred) = preferred_hostel {
            narrow(&mut eligible, |index| &self.slots[index].hostel.id == preferred);
        }

        Ok(eligible)
    }

    pub fn first_free_bed(&self, index: SlotIndex) -> Option<u16> {
        let slot = &self.slots[index];
        if slot.room.is_available() {
            slot.room.first_free_bed()
        } else {
            None
        }
    }

    /// Records a committed placement in the snapshot.
    pub(crate) fn occupy(&mut self, index: SlotIndex, bed: u16) {
        let room = &mut self.slots[index].room;
        if let Some(space) = room.bed_mut(bed) {
            if !space.is_occupied {
                space.is_occupied = true;
                room.current_occupancy = room.current_occupancy.saturating_add(1);
            }
        }
    }

    /// Replaces a stale room copy with the authoritative one after a rejected claim.
    pub(crate) fn refresh(&mut self, index: SlotIndex, room: Room) {
        self.slots[index].room = room;
    }
}

fn narrow(candidates: &mut Vec<SlotIndex>, keep: impl Fn(SlotIndex) -> bool) {
    let narrowed: Vec<SlotIndex> = candidates.iter().copied().filter(|i| keep(*i)).collect();
    if !narrowed.is_empty() {
        *candidates = narrowed;
    }
}
