use super::common::{accessible, hostel, room};
use crate::allocation::domain::{Gender, HostelGenderType, HostelId, PlacementFailure};
use crate::allocation::inventory::InventorySnapshot;

fn room_ids(snapshot: &InventorySnapshot, indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .map(|index| snapshot.slot(*index).room.id.0.clone())
        .collect()
}

#[test]
fn buckets_order_accessible_rooms_first_then_by_number() {
    let hostels = vec![hostel("unity", HostelGenderType::Mixed)];
    let rooms = vec![
        room("unity-300", "unity", "300", 2),
        room("unity-100", "unity", "100", 2),
        accessible(room("unity-200", "unity", "200", 2)),
    ];
    let snapshot = InventorySnapshot::build(hostels, rooms);

    let candidates = snapshot
        .candidates(Gender::Male, false, None)
        .expect("mixed rooms are eligible");
    assert_eq!(
        room_ids(&snapshot, &candidates),
        vec!["unity-200", "unity-100", "unity-300"]
    );
}

#[test]
fn unavailable_rooms_are_left_out_of_the_snapshot() {
    let hostels = vec![hostel("kings", HostelGenderType::Male)];
    let mut closed = room("kings-1", "kings", "1", 2);
    closed.is_active = false;
    let mut repairs = room("kings-2", "kings", "2", 2);
    repairs.is_under_maintenance = true;
    let mut full = room("kings-3", "kings", "3", 1);
    full.bed_spaces[0].is_occupied = true;
    full.current_occupancy = 1;
    let orphan = room("ghost-1", "ghost", "1", 2);
    let open = room("kings-4", "kings", "4", 2);

    let snapshot = InventorySnapshot::build(hostels, vec![closed, repairs, full, orphan, open]);

    assert_eq!(snapshot.len(), 1);
    let available = snapshot.available_rooms();
    let male: Vec<&str> = available[&HostelGenderType::Male]
        .iter()
        .map(|room| room.id.as_str())
        .collect();
    assert_eq!(male, vec!["kings-4"]);
}

#[test]
fn distinguishes_missing_bucket_from_exhausted_bucket() {
    let hostels = vec![hostel("queens", HostelGenderType::Female)];
    let mut last_bed = room("queens-1", "queens", "1", 1);
    last_bed.bed_spaces[0].is_active = false;
    let snapshot = InventorySnapshot::build(hostels, vec![last_bed]);

    assert_eq!(
        snapshot.candidates(Gender::Male, false, None),
        Err(PlacementFailure::NoEligibleRoom)
    );
    assert_eq!(
        snapshot.candidates(Gender::Female, false, None),
        Err(PlacementFailure::NoAvailableBed)
    );
    assert_eq!(
        snapshot.candidates(Gender::Other, false, None),
        Err(PlacementFailure::NoEligibleRoom)
    );
}

#[test]
fn occupying_the_last_bed_exhausts_the_room() {
    let hostels = vec![hostel("queens", HostelGenderType::Female)];
    let snapshot_rooms = vec![room("queens-1", "queens", "1", 1)];
    let mut snapshot = InventorySnapshot::build(hostels, snapshot_rooms);

    let candidates = snapshot
        .candidates(Gender::Female, false, None)
        .expect("one free bed");
    let index = candidates[0];
    assert_eq!(snapshot.first_free_bed(index), Some(1));

    snapshot.occupy(index, 1);
    assert_eq!(snapshot.first_free_bed(index), None);
    assert_eq!(snapshot.slot(index).room.current_occupancy, 1);
    assert_eq!(
        snapshot.candidates(Gender::Female, false, None),
        Err(PlacementFailure::NoAvailableBed)
    );
}

#[test]
fn preferences_narrow_only_when_satisfiable() {
    let hostels = vec![
        hostel("queens", HostelGenderType::Female),
        hostel("unity", HostelGenderType::Mixed),
    ];
    let rooms = vec![
        room("queens-1", "queens", "1", 2),
        room("unity-1", "unity", "1", 2),
    ];
    let snapshot = InventorySnapshot::build(hostels, rooms);

    let unity = HostelId::new("unity");
    let preferred = snapshot
        .candidates(Gender::Female, false, Some(&unity))
        .expect("eligible rooms");
    assert_eq!(room_ids(&snapshot, &preferred), vec!["unity-1"]);

    let nowhere = HostelId::new("kings");
    let unmatched = snapshot
        .candidates(Gender::Female, true, Some(&nowhere))
        .expect("eligible rooms");
    assert_eq!(room_ids(&snapshot, &unmatched), vec!["queens-1", "unity-1"]);
}
