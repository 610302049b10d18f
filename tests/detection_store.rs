//! Detection store round-trips: insert, list, review updates.

use chrono::Utc;
use uuid::Uuid;

use velotrack::snapshot::build_suggestions;
use velotrack::{BoundingBox, DetectionStore, UniqueDetection, VehicleClass};

fn record(frame_number: u64, class: VehicleClass, confidence: f32) -> UniqueDetection {
    UniqueDetection {
        id: Uuid::new_v4(),
        timestamp: "00:00:01.000".to_string(),
        frame_number,
        full_frame_image: "data:image/jpeg;base64,QUJD".to_string(),
        crop_image: "data:image/jpeg;base64,REVG".to_string(),
        bbox: BoundingBox::new(100.0, 100.0, 50.0, 50.0),
        suggestions: build_suggestions(class, confidence),
        user_choice: None,
        is_manual_label: false,
        is_manual_correction: false,
        processed_at: Utc::now(),
    }
}

fn open_store(dir: &tempfile::TempDir) -> DetectionStore {
    let path = dir.path().join("detections.db");
    DetectionStore::open(path.to_str().unwrap()).unwrap()
}

#[test]
fn insert_and_list_by_video() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = open_store(&dir);

    store.insert("ride.mp4", &record(30, VehicleClass::Bicycle, 0.85)).unwrap();
    store.insert("ride.mp4", &record(5, VehicleClass::Car, 0.90)).unwrap();
    store.insert("other.mp4", &record(0, VehicleClass::Bus, 0.70)).unwrap();

    let rows = store.get_recent(Some("ride.mp4"), 10).unwrap();
    assert_eq!(rows.len(), 2);
    // Ordered by frame number within a video.
    assert_eq!(rows[0].frame_number, 5);
    assert_eq!(rows[0].label, "car");
    assert_eq!(rows[1].frame_number, 30);
    assert_eq!(rows[1].label, "bicycle");
}

#[test]
fn images_survive_the_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = open_store(&dir);

    let rec = record(12, VehicleClass::Bicycle, 0.85);
    store.insert("ride.mp4", &rec).unwrap();

    let (full, crop) = store.get_images(&rec.id.to_string()).unwrap();
    assert_eq!(full, rec.full_frame_image);
    assert_eq!(crop, rec.crop_image);
}

#[test]
fn differing_choice_is_flagged_as_correction() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = open_store(&dir);

    let rec = record(0, VehicleClass::Bicycle, 0.85);
    store.insert("ride.mp4", &rec).unwrap();
    store
        .update_user_choice(&rec.id.to_string(), VehicleClass::ElectricScooter, true)
        .unwrap();

    let rows = store.get_recent(Some("ride.mp4"), 10).unwrap();
    assert_eq!(rows[0].user_choice.as_deref(), Some("electric_scooter"));
    assert!(rows[0].is_manual_label);
    assert!(rows[0].is_manual_correction);
}

#[test]
fn confirming_choice_is_not_a_correction() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = open_store(&dir);

    let rec = record(0, VehicleClass::Bicycle, 0.85);
    store.insert("ride.mp4", &rec).unwrap();
    store
        .update_user_choice(&rec.id.to_string(), VehicleClass::Bicycle, false)
        .unwrap();

    let rows = store.get_recent(Some("ride.mp4"), 10).unwrap();
    assert_eq!(rows[0].user_choice.as_deref(), Some("bicycle"));
    assert!(!rows[0].is_manual_correction);
}

#[test]
fn counts_group_by_class() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = open_store(&dir);

    for frame in 0..3 {
        store.insert("ride.mp4", &record(frame, VehicleClass::Bicycle, 0.85)).unwrap();
    }
    store.insert("ride.mp4", &record(99, VehicleClass::Car, 0.90)).unwrap();

    let counts = store.count_by_class(Some("ride.mp4")).unwrap();
    assert_eq!(counts[0], ("bicycle".to_string(), 3));
    assert_eq!(counts[1], ("car".to_string(), 1));
}
