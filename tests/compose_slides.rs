use std::collections::BTreeMap;

use chrono::Utc;
use gallery_model::{Group, GroupMap, ImageRecord, Settings};
use slideshow_server::{Slide, compose_slides};

const SEED: u64 = 0xDEC0_D1A5;

fn gallery(names: &[&str]) -> BTreeMap<String, ImageRecord> {
    names
        .iter()
        .map(|name| (name.to_string(), ImageRecord::default()))
        .collect()
}

fn group(members: &[&str]) -> Group {
    Group::new(
        members.iter().map(|m| m.to_string()).collect(),
        Some("#ffffff".into()),
        Utc::now(),
    )
    .unwrap()
}

fn names(slides: &[Slide]) -> Vec<Vec<&str>> {
    slides.iter().map(|s| s.filenames()).collect()
}

#[test]
fn empty_gallery_has_no_slides() {
    let slides = compose_slides(&BTreeMap::new(), &GroupMap::default(), &Settings::default(), SEED);
    assert!(slides.is_empty());
}

#[test]
fn groups_come_first_then_singles_by_filename() {
    let images = gallery(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
    let groups: GroupMap = [("group_00000001".to_string(), group(&["d.jpg", "b.jpg"]))]
        .into_iter()
        .collect();
    let slides = compose_slides(&images, &groups, &Settings::default(), SEED);
    assert_eq!(
        names(&slides),
        vec![vec!["d.jpg", "b.jpg"], vec!["a.jpg"], vec!["c.jpg"]]
    );
    assert_eq!(slides[0].group_id(), Some("group_00000001"));
    match &slides[0] {
        Slide::Group { mat_color, .. } => assert_eq!(mat_color.as_deref(), Some("#ffffff")),
        other => panic!("expected group slide, got {other:?}"),
    }
}

#[test]
fn groups_keep_storage_order() {
    let images = gallery(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
    let groups: GroupMap = [
        ("group_zzzz".to_string(), group(&["c.jpg", "d.jpg"])),
        ("group_aaaa".to_string(), group(&["a.jpg", "b.jpg"])),
    ]
    .into_iter()
    .collect();
    let slides = compose_slides(&images, &groups, &Settings::default(), SEED);
    let ids: Vec<_> = slides.iter().filter_map(Slide::group_id).collect();
    assert_eq!(ids, vec!["group_zzzz", "group_aaaa"]);
}

#[test]
fn disabled_member_suppresses_the_whole_group() {
    let mut images = gallery(&["a.jpg", "b.jpg", "c.jpg"]);
    images.get_mut("b.jpg").unwrap().enabled = false;
    let groups: GroupMap = [("group_1".to_string(), group(&["a.jpg", "b.jpg"]))]
        .into_iter()
        .collect();
    let slides = compose_slides(&images, &groups, &Settings::default(), SEED);
    // a.jpg is enabled but belongs to an incomplete group, so it is hidden too.
    assert_eq!(names(&slides), vec![vec!["c.jpg"]]);
}

#[test]
fn disabled_singles_are_skipped() {
    let mut images = gallery(&["a.jpg", "b.jpg"]);
    images.get_mut("a.jpg").unwrap().enabled = false;
    let slides = compose_slides(&images, &GroupMap::default(), &Settings::default(), SEED);
    assert_eq!(names(&slides), vec![vec!["b.jpg"]]);
}

#[test]
fn scales_default_to_one() {
    let mut images = gallery(&["a.jpg", "b.jpg", "c.jpg"]);
    images.get_mut("c.jpg").unwrap().scale = Some(1.5);
    let mut members = group(&["a.jpg", "b.jpg"]);
    members.scales.insert("b.jpg".into(), 0.8);
    let groups: GroupMap = [("group_1".to_string(), members)].into_iter().collect();

    let slides = compose_slides(&images, &groups, &Settings::default(), SEED);
    match &slides[0] {
        Slide::Group { images, .. } => {
            assert_eq!(images[0].scale, 1.0);
            assert_eq!(images[1].scale, 0.8);
        }
        other => panic!("expected group slide, got {other:?}"),
    }
    match &slides[1] {
        Slide::Single { image, .. } => assert_eq!(image.scale, 1.5),
        other => panic!("expected single slide, got {other:?}"),
    }
}

#[test]
fn image_order_moves_listed_slides_to_the_front() {
    let images = gallery(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
    let groups: GroupMap = [("group_1".to_string(), group(&["a.jpg", "b.jpg"]))]
        .into_iter()
        .collect();
    let settings = Settings {
        image_order: vec!["d.jpg".into(), "b.jpg".into()],
        ..Settings::default()
    };
    let slides = compose_slides(&images, &groups, &settings, SEED);
    assert_eq!(
        names(&slides),
        vec![vec!["d.jpg"], vec!["a.jpg", "b.jpg"], vec!["c.jpg"]]
    );
}

#[test]
fn shuffle_is_stable_for_a_seed() {
    let images = gallery(&[
        "a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg", "g.jpg", "h.jpg",
    ]);
    let settings = Settings {
        shuffle: true,
        ..Settings::default()
    };
    let first = compose_slides(&images, &GroupMap::default(), &settings, SEED);
    let second = compose_slides(&images, &GroupMap::default(), &settings, SEED);
    assert_eq!(first, second);

    let mut shuffled: Vec<_> = names(&first).into_iter().flatten().collect();
    shuffled.sort_unstable();
    assert_eq!(shuffled.len(), 8);
    assert_eq!(shuffled[0], "a.jpg");
    assert_eq!(shuffled[7], "h.jpg");
}

#[test]
fn undersized_stored_group_renders_members_as_singles() {
    let images = gallery(&["a.jpg", "b.jpg"]);
    let mut lonely = group(&["a.jpg", "b.jpg"]);
    lonely.images.truncate(1);
    let groups: GroupMap = [("group_1".to_string(), lonely)].into_iter().collect();
    let slides = compose_slides(&images, &groups, &Settings::default(), SEED);
    assert_eq!(names(&slides), vec![vec!["a.jpg"], vec!["b.jpg"]]);
}
