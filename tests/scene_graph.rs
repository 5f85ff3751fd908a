use stagecraft::prelude::*;

fn square(color: Color, x: f64, y: f64, size: f32) -> Node {
    Node::shape(Graphics::filled_rect(color, 0.0, 0.0, size, size)).with_position(x, y)
}

#[test]
fn test_membership_stays_in_sync() {
    let mut scene = Scene::new();
    let a = scene.insert(Node::container());
    let b = scene.insert(Node::container());
    let kids: Vec<NodeId> = (0..4).map(|_| scene.insert(Node::container())).collect();

    scene.add_children(a, &kids).unwrap();
    scene.remove_child(a, kids[1]);
    scene.add_child_at(b, kids[2], 0).unwrap();
    scene.add_child_at(a, kids[1], 0).unwrap();

    for parent in [a, b] {
        for &child in scene.children(parent) {
            assert_eq!(scene.parent(child), Some(parent));
        }
    }
    assert_eq!(scene.children(a), &[kids[1], kids[0], kids[3]]);
    assert_eq!(scene.children(b), &[kids[2]]);
}

#[test]
fn test_reparenting_moves_the_node() {
    let mut scene = Scene::new();
    let a = scene.insert(Node::container());
    let b = scene.insert(Node::container());
    let child = scene.spawn_child(a, Node::container()).unwrap();

    scene.add_child(b, child).unwrap();
    assert!(scene.children(a).is_empty());
    assert_eq!(scene.children(b).iter().filter(|&&c| c == child).count(), 1);
    assert_eq!(scene.parent(child), Some(b));
}

#[test]
fn test_front_sibling_is_hit_first() {
    let mut scene = Scene::new();
    let root = scene.insert(Node::container());
    let back = scene.spawn_child(root, square(Color::BLACK, 0.0, 0.0, 10.0)).unwrap();
    let front = scene.spawn_child(root, square(Color::WHITE, 5.0, 5.0, 10.0)).unwrap();

    assert_eq!(scene.object_under_point(root, 7.0, 7.0, HitMode::All).unwrap(), Some(front));
    assert_eq!(
        scene.objects_under_point(root, 7.0, 7.0, HitMode::All).unwrap(),
        vec![front, back]
    );
}

#[test]
fn test_container_mask_hides_descendants() {
    let mut scene = Scene::new();
    let root = scene.insert(Node::container());
    let mask = scene.insert(square(Color::BLACK, 0.0, 0.0, 5.0));
    let mut group = Node::container();
    group.mask = Some(mask);
    let group = scene.spawn_child(root, group).unwrap();
    let leaf = scene.spawn_child(group, square(Color::BLACK, 0.0, 0.0, 20.0)).unwrap();

    assert_eq!(scene.object_under_point(root, 2.0, 2.0, HitMode::All).unwrap(), Some(leaf));
    assert!(scene.objects_under_point(root, 12.0, 12.0, HitMode::All).unwrap().is_empty());
}

#[test]
fn test_container_bounds_union_children() {
    let mut scene = Scene::new();
    let root = scene.insert(Node::container());
    scene.spawn_child(root, square(Color::BLACK, 0.0, 0.0, 50.0)).unwrap();
    scene.spawn_child(root, square(Color::BLACK, 50.0, 0.0, 50.0)).unwrap();

    assert_eq!(scene.bounds(root), Some(Rect::new(0.0, 0.0, 100.0, 50.0)));
}

#[test]
fn test_append_pure_scale_keeps_translation() {
    let mut m = Transform2D::new(1.0, 0.0, 0.0, 1.0, 10.0, 10.0);
    m.append_transform(0.0, 0.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    assert_eq!(m, Transform2D::new(2.0, 0.0, 0.0, 2.0, 10.0, 10.0));
}

#[test]
fn test_concatenated_matrix_matches_manual_product() {
    let mut scene = Scene::new();
    let root = scene.insert(Node::container().with_position(10.0, 0.0));
    let mut mid = Node::container();
    mid.scale_x = 2.0;
    mid.scale_y = 2.0;
    let mid = scene.spawn_child(root, mid).unwrap();
    let leaf = scene.spawn_child(mid, Node::container().with_position(3.0, 4.0)).unwrap();

    let pt = scene.local_to_global(leaf, 1.0, 1.0);
    assert_eq!((pt.x, pt.y), (18.0, 10.0));
}
