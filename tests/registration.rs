use slicer_rt::geometry::Point3;
use slicer_rt::modules::{ModuleManager, VolumesModule};
use slicer_rt::plastimatch::{
	self, PlastimatchLogic, PlastimatchModule, RegistrationConfig, RegistrationError,
};
use slicer_rt::scene::{ImageData, NodeId, PointListNode, Scene, VolumeNode};
use std::sync::Arc;

fn plastimatch_logic() -> Arc<PlastimatchLogic> {
	let mut manager = ModuleManager::new();
	manager.register(Box::new(VolumesModule::default())).unwrap();
	manager.register(Box::new(PlastimatchModule::default())).unwrap();
	manager.setup_all();
	manager.logic::<PlastimatchLogic>(plastimatch::MODULE_NAME).unwrap()
}

/// 10³ volume with a 3³ cube of 100 starting at `start` along x.
fn cube(name: &str, start: usize) -> VolumeNode {
	let mut image = ImageData::filled([10, 10, 10], 0.0);
	for k in 3..6 {
		for j in 3..6 {
			for i in start..start + 3 {
				image.set(i, j, k, 100.0);
			}
		}
	}
	VolumeNode::new(name).with_image(image)
}

struct Fixture {
	scene: Scene,
	fixed: NodeId,
	moving: NodeId,
	output: NodeId,
}

fn fixture() -> Fixture {
	let mut scene = Scene::new();
	let fixed = scene.add_node(cube("CT", 3));
	let moving = scene.add_node(cube("CBCT", 5));
	let output = scene.add_node(VolumeNode::new("CBCT registered"));
	Fixture {
		scene,
		fixed,
		moving,
		output,
	}
}

#[test]
fn center_of_gravity_alignment_restores_fixed_image() {
	let Fixture {
		mut scene,
		fixed,
		moving,
		output,
	} = fixture();
	let mut builder = RegistrationConfig::builder();
	builder
		.fixed(fixed.clone())
		.moving(moving)
		.output_volume(output.clone())
		.add_stage()
		.set_par("xform", "align_center_of_gravity")
		.unwrap();
	let config = builder.build().unwrap();

	let outputs = plastimatch_logic()
		.run_registration(&mut scene, &config)
		.unwrap();
	assert!((outputs.vector_field.max_magnitude() - 2.0).abs() < 1e-9);
	assert!(outputs.warped_landmarks.is_none());

	let output = scene.volume(&output).unwrap();
	let fixed = scene.volume(&fixed).unwrap();
	assert_eq!(output.geometry, fixed.geometry);
	let warped = output.image.as_ref().unwrap();
	assert_eq!(warped.dims(), [10, 10, 10]);
	assert_eq!(warped.get(4, 4, 4), 100.0);
	assert_eq!(warped.get(6, 4, 4), 0.0);
	// samples beyond the moving image take the default value
	assert_eq!(warped.get(8, 4, 4), -1200.0);
}

#[test]
fn landmarks_are_warped_into_fixed_space() {
	let Fixture {
		mut scene,
		fixed,
		moving,
		output,
	} = fixture();
	let fixed_points = scene.add_node(PointListNode::from_positions(
		"F",
		[Point3::new(4.0, 4.0, 4.0), Point3::new(5.0, 6.0, 4.0)],
	));
	let moving_points = scene.add_node(PointListNode::from_positions(
		"M",
		[Point3::new(6.0, 4.0, 4.0), Point3::new(7.0, 6.0, 4.0)],
	));
	let mut stale = PointListNode::new("Warped");
	stale.add_point("old", Point3::origin());
	let warped_points = scene.add_node(stale);

	let mut builder = RegistrationConfig::builder();
	builder
		.fixed(fixed)
		.moving(moving)
		.output_volume(output.clone())
		.landmarks_from_points(fixed_points, moving_points)
		.warped_landmarks(warped_points.clone())
		.add_stage()
		.set_par("xform", "translation")
		.unwrap();
	let config = builder.build().unwrap();

	let outputs = plastimatch_logic()
		.run_registration(&mut scene, &config)
		.unwrap();
	assert_eq!(outputs.warped_landmarks_node.as_ref(), Some(&warped_points));

	let warped = scene.point_list(&warped_points).unwrap();
	assert_eq!(warped.len(), 2);
	let expected = [Point3::new(4.0, 4.0, 4.0), Point3::new(5.0, 6.0, 4.0)];
	for (point, expected) in warped.positions().zip(expected) {
		assert!(nalgebra::distance(&point, &expected) < 1e-6, "{point:?}");
	}

	// the image moves with the landmarks: the cube is back at x = 3..5
	let image = scene.volume(&output).unwrap().image.as_ref().unwrap();
	for i in 3..6 {
		assert_eq!(image.get(i, 4, 4), 100.0, "x = {i}");
	}
	assert_eq!(image.get(2, 4, 4), 0.0);
	assert_eq!(image.get(6, 4, 4), 0.0);
}

#[test]
fn failed_run_leaves_output_untouched() {
	let Fixture {
		mut scene,
		fixed,
		moving,
		output,
	} = fixture();
	let fixed_points =
		scene.add_node(PointListNode::from_positions("F", [Point3::new(4.0, 4.0, 4.0)]));
	let moving_points = scene.add_node(PointListNode::from_positions(
		"M",
		[Point3::new(6.0, 4.0, 4.0), Point3::new(7.0, 6.0, 4.0)],
	));

	let mut builder = RegistrationConfig::builder();
	builder
		.fixed(fixed)
		.moving(moving)
		.output_volume(output.clone())
		.landmarks_from_points(fixed_points, moving_points)
		.add_stage()
		.set_par("xform", "translation")
		.unwrap();
	let config = builder.build().unwrap();

	let result = plastimatch_logic().run_registration(&mut scene, &config);
	assert!(matches!(
		result,
		Err(RegistrationError::LandmarkCountMismatch {
			fixed: 1,
			moving: 2
		})
	));
	assert!(scene.volume(&output).unwrap().image.is_none());
	assert!(scene.find_by_name("WarpedLandmarks").is_none());
}
