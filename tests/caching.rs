use stagecraft::prelude::*;
use stagecraft::FlushReason;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn gl_stage(scene: &mut Scene, backend: SoftwareBackend, options: StageGLOptions) -> StageGL {
    let (w, h) = (20, 20);
    StageGL::with_backend(scene, w, h, options.with_transparent(true), Box::new(backend)).unwrap()
}

fn software() -> SoftwareBackend {
    SoftwareBackend::new(20, 20).unwrap()
}

/// 2x4 image, red on top and blue at the bottom.
fn two_tone(scene: &mut Scene) -> ImageId {
    let mut pixels = Vec::new();
    for y in 0..4 {
        let color = if y < 2 { [255, 0, 0, 255] } else { [0, 0, 255, 255] };
        pixels.extend_from_slice(&color);
        pixels.extend_from_slice(&color);
    }
    scene.add_image(ImageSource::from_rgba(2, 4, pixels).unwrap())
}

fn square(color: Color, size: f32) -> Node {
    Node::shape(Graphics::filled_rect(color, 0.0, 0.0, size, size))
}

fn green_square(size: f32) -> Node {
    square(Color::rgb(0.0, 1.0, 0.0), size)
}

fn repaint(scene: &mut Scene, id: NodeId, color: Color, size: f32) {
    scene.node_mut(id).unwrap().kind = square(color, size).kind;
}

fn pixel(stage: &mut StageGL, x: u32, y: u32) -> [u8; 4] {
    stage.snapshot().unwrap().pixel(x, y).unwrap().unwrap()
}

#[test]
fn test_update_bumps_generation_once() {
    init_logger();
    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let id = scene.spawn_child(stage.root(), green_square(10.0)).unwrap();
    stage.cache_node(&mut scene, id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();
    assert_eq!(scene.node(id).unwrap().cache().unwrap().cache_id(), 1);

    for expected in [2, 3] {
        stage.update_cache_node(&mut scene, id).unwrap();
        let cache = scene.node(id).unwrap().cache().unwrap();
        assert_eq!(cache.cache_id(), expected);
        assert_eq!(cache.draw_size(), (10, 10));
    }
}

#[test]
fn test_update_before_cache_fails() {
    init_logger();
    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let id = scene.spawn_child(stage.root(), green_square(10.0)).unwrap();
    assert!(matches!(stage.update_cache_node(&mut scene, id), Err(StageError::NoCache)));
}

#[test]
fn test_cache_prunes_the_walk() {
    init_logger();
    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let group = scene.spawn_child(stage.root(), Node::container()).unwrap();
    let image = two_tone(&mut scene);
    for i in 0..3 {
        scene
            .spawn_child(group, Node::bitmap(image).with_position(i as f64 * 2.0, 0.0))
            .unwrap();
    }
    stage.cache_node(&mut scene, group, 0.0, 0.0, 6.0, 4.0, 1.0).unwrap();
    stage.reset_stats();
    stage.update(&mut scene, &FrameData::default()).unwrap();

    assert_eq!(stage.stats().cards, 1);
    assert_eq!(pixel(&mut stage, 5, 0), [255, 0, 0, 255]);
    assert_eq!(pixel(&mut stage, 5, 3), [0, 0, 255, 255]);
}

#[test]
fn test_flipped_targets_keep_orientation() {
    init_logger();
    for filtered in [false, true] {
        let mut scene = Scene::new();
        let backend = software().with_flipped_targets(true);
        let mut stage = gl_stage(&mut scene, backend, StageGLOptions::default());
        let image = two_tone(&mut scene);
        let mut node = Node::bitmap(image);
        if filtered {
            node.filters.push(Box::new(ColorFilter::default()));
        }
        let id = scene.spawn_child(stage.root(), node).unwrap();
        stage.cache_node(&mut scene, id, 0.0, 0.0, 2.0, 4.0, 1.0).unwrap();
        stage.update(&mut scene, &FrameData::default()).unwrap();

        assert_eq!(pixel(&mut stage, 0, 0), [255, 0, 0, 255], "filtered: {filtered}");
        assert_eq!(pixel(&mut stage, 0, 3), [0, 0, 255, 255], "filtered: {filtered}");
    }
}

#[test]
fn test_filters_match_the_raster_cache() {
    init_logger();
    let tint = || -> Box<dyn Filter> { Box::new(ColorFilter::tint(0, 0, 255)) };

    let mut raster_scene = Scene::new();
    let mut raster = Stage::new(&mut raster_scene, 20, 20).unwrap();
    let mut node = green_square(10.0).with_position(2.0, 2.0);
    node.filters.push(tint());
    let id = raster_scene.spawn_child(raster.root(), node).unwrap();
    raster_scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();
    raster.update(&mut raster_scene, &FrameData::default()).unwrap();

    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let mut node = green_square(10.0).with_position(2.0, 2.0);
    node.filters.push(tint());
    let id = scene.spawn_child(stage.root(), node).unwrap();
    stage.cache_node(&mut scene, id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();
    stage.update(&mut scene, &FrameData::default()).unwrap();

    for (x, y) in [(1, 1), (2, 2), (6, 6), (11, 11), (12, 12)] {
        assert_eq!(
            raster.surface().pixel(x, y).unwrap(),
            stage.snapshot().unwrap().pixel(x, y).unwrap(),
            "pixel ({x}, {y})"
        );
    }
    assert_eq!(pixel(&mut stage, 6, 6), [0, 0, 255, 255]);
}

#[test]
fn test_tainted_cache_rejects_cpu_filters() {
    init_logger();
    for strict in [true, false] {
        let mut scene = Scene::new();
        scene.set_strict(strict);
        let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
        let image = scene.add_image(ImageSource::solid(4, 4, Color::WHITE).unwrap().with_origin_clean(false));
        let mut node = Node::bitmap(image);
        node.filters.push(Box::new(ColorFilter::tint(255, 0, 0)));
        let id = scene.spawn_child(stage.root(), node).unwrap();

        let result = stage.cache_node(&mut scene, id, 0.0, 0.0, 4.0, 4.0, 1.0);
        if strict {
            assert!(matches!(result, Err(StageError::Tainted)));
        } else {
            result.unwrap();
            stage.update(&mut scene, &FrameData::default()).unwrap();
            assert!(stage.snapshot().unwrap().is_tainted());
        }
    }
}

#[test]
fn test_cache_controlled_reads_back_pixels() {
    init_logger();
    let mut scene = Scene::new();
    let options = StageGLOptions::default().with_cache_controlled(true);
    let mut stage = gl_stage(&mut scene, software(), options);
    let id = scene.spawn_child(stage.root(), green_square(4.0)).unwrap();
    stage.cache_node(&mut scene, id, 0.0, 0.0, 4.0, 4.0, 1.0).unwrap();

    let cache = scene.node(id).unwrap().cache().unwrap();
    assert!(!cache.is_texture());
    assert_eq!(cache.surface().unwrap().pixel(1, 1).unwrap(), Some([0, 255, 0, 255]));
    assert!(scene.cache_data_url(id).unwrap().is_some());

    stage.update(&mut scene, &FrameData::default()).unwrap();
    assert_eq!(pixel(&mut stage, 1, 1), [0, 255, 0, 255]);
}

#[test]
fn test_render_texture_pair_is_reused() {
    init_logger();
    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let mut node = green_square(4.0);
    node.filters.push(Box::new(ColorFilter::default()));
    let id = scene.spawn_child(stage.root(), node).unwrap();

    stage.cache_node(&mut scene, id, 0.0, 0.0, 4.0, 4.0, 1.0).unwrap();
    let after_first = stage.texture_count();
    assert_eq!(after_first, 2);
    for _ in 0..3 {
        stage.update_cache_node(&mut scene, id).unwrap();
    }
    assert_eq!(stage.texture_count(), after_first);

    let target = stage.get_target_render_texture(id, 4, 4).unwrap();
    assert_eq!(stage.get_target_render_texture(id, 4, 4).unwrap(), target);
}

#[test]
fn test_recache_replaces_uploaded_pixels() {
    init_logger();
    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let id = scene.spawn_child(stage.root(), square(Color::rgb(1.0, 0.0, 0.0), 10.0)).unwrap();
    scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();
    stage.update(&mut scene, &FrameData::default()).unwrap();
    assert_eq!(pixel(&mut stage, 5, 5), [255, 0, 0, 255]);

    repaint(&mut scene, id, Color::rgb(0.0, 0.0, 1.0), 10.0);
    scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();
    assert_eq!(scene.node(id).unwrap().cache().unwrap().cache_id(), 2);
    stage.update(&mut scene, &FrameData::default()).unwrap();
    assert_eq!(pixel(&mut stage, 5, 5), [0, 0, 255, 255]);

    // a larger region uploads at the new size
    repaint(&mut scene, id, Color::rgb(0.0, 1.0, 0.0), 14.0);
    scene.cache(id, 0.0, 0.0, 14.0, 14.0, 1.0).unwrap();
    stage.update(&mut scene, &FrameData::default()).unwrap();
    assert_eq!(pixel(&mut stage, 12, 12), [0, 255, 0, 255]);
    assert_eq!(stage.texture_count(), 1);
}

#[test]
fn test_dropped_caches_release_render_textures() {
    init_logger();
    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let base = stage.texture_count();

    for _ in 0..5 {
        let id = scene.spawn_child(stage.root(), green_square(4.0)).unwrap();
        stage.cache_node(&mut scene, id, 0.0, 0.0, 4.0, 4.0, 1.0).unwrap();
        stage.update(&mut scene, &FrameData::default()).unwrap();
        scene.remove_node(id);
    }
    stage.purge_textures(Some(0));
    assert_eq!(stage.texture_count(), base);

    let id = scene.spawn_child(stage.root(), green_square(4.0)).unwrap();
    stage.cache_node(&mut scene, id, 0.0, 0.0, 4.0, 4.0, 1.0).unwrap();
    assert_eq!(stage.texture_count(), base + 1);
    scene.uncache(id);
    stage.update(&mut scene, &FrameData::default()).unwrap();
    assert_eq!(stage.texture_count(), base);
}

#[test]
fn test_invalidated_cache_refreshes_mid_draw() {
    init_logger();
    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let image = two_tone(&mut scene);
    scene.spawn_child(stage.root(), Node::bitmap(image)).unwrap();
    let id = scene
        .spawn_child(stage.root(), green_square(4.0).with_position(4.0, 0.0))
        .unwrap();
    stage.cache_node(&mut scene, id, 0.0, 0.0, 4.0, 4.0, 1.0).unwrap();

    repaint(&mut scene, id, Color::rgb(0.0, 0.0, 1.0), 4.0);
    scene.invalidate_cache(id).unwrap();
    stage.reset_stats();
    stage.update(&mut scene, &FrameData::default()).unwrap();

    let stats = stage.stats();
    assert_eq!(stats.flushes_for(FlushReason::Nested), 1);
    assert_eq!(stats.flushes_for(FlushReason::Final), 1);
    let cache = scene.node(id).unwrap().cache().unwrap();
    assert_eq!(cache.cache_id(), 2);
    assert!(!cache.is_invalid());
    assert_eq!(pixel(&mut stage, 0, 0), [255, 0, 0, 255]);
    assert_eq!(pixel(&mut stage, 5, 1), [0, 0, 255, 255]);
}

#[test]
fn test_software_backend_filters_on_the_cpu() {
    init_logger();
    let mut scene = Scene::new();
    let mut stage = gl_stage(&mut scene, software(), StageGLOptions::default());
    let mut node = green_square(4.0);
    node.filters.push(Box::new(ColorFilter::tint(0, 0, 255)));
    let id = scene.spawn_child(stage.root(), node).unwrap();

    stage.reset_stats();
    stage.cache_node(&mut scene, id, 0.0, 0.0, 4.0, 4.0, 1.0).unwrap();
    let stats = stage.stats();
    assert_eq!(stats.covers, 0);
    // first pass plus the filtered pixels
    assert_eq!(stats.uploads, 2);

    stage.update(&mut scene, &FrameData::default()).unwrap();
    assert_eq!(pixel(&mut stage, 1, 1), [0, 0, 255, 255]);
}
