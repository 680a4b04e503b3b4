use approx::assert_abs_diff_eq;
use glam::dvec3;
use nalgebra::DVector;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rotor_math::{
    coefficients::{CoefficientSource, Exploration, FixedCoefficients, PredictionMode},
    energy::{power_proxy, EnergyMonitor},
    nullspace::NullSpaceSolver,
    octo::{OctoRotorId, TiltedRing},
    snapshot::{AllocationSnapshot, SharedAllocation},
    solve::{
        forward,
        reverse::{self, ControlAllocator, ThrustBounds, ThrustLimit},
    },
    Direction, Rotor, VehicleGeometry, Wrench, WrenchAxes,
};

fn octo(tilt_degrees: f64) -> VehicleGeometry<OctoRotorId> {
    VehicleGeometry::<OctoRotorId>::new(
        TiltedRing {
            radius: 0.25,
            tilt_degrees,
            torque_coefficient: 0.01,
        },
        1.0,
    )
    .unwrap()
}

fn random_geometry(rng: &mut StdRng, rotors: u8) -> VehicleGeometry<u8> {
    let mut vec = || dvec3(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));

    let rotors = (0..rotors)
        .map(|idx| {
            (
                idx,
                Rotor {
                    position: vec(),
                    orientation: vec(),
                    direction: Direction::Clockwise.flip_n(idx as i32),
                    torque_coefficient: 0.02,
                },
            )
        })
        .collect::<Vec<_>>();

    VehicleGeometry::new_raw(rotors, 1.0).unwrap()
}

fn random_wrench(rng: &mut StdRng, scale: f64) -> Wrench {
    Wrench {
        force: dvec3(
            rng.gen_range(-scale..scale),
            rng.gen_range(-scale..scale),
            rng.gen_range(-scale..scale),
        ),
        torque: dvec3(
            rng.gen_range(-scale..scale),
            rng.gen_range(-scale..scale),
            rng.gen_range(-scale..scale),
        ) * 0.1,
    }
}

fn random_coefficients(rng: &mut StdRng, dim: usize, scale: f64) -> DVector<f64> {
    DVector::from_fn(dim, |_, _| rng.gen_range(-scale..scale))
}

#[test]
fn null_space_annihilates_random_geometries() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let solver = NullSpaceSolver::default();

    for rotors in [6, 7, 8, 10, 12] {
        for _ in 0..10 {
            let geometry = random_geometry(&mut rng, rotors);
            let snapshot = AllocationSnapshot::new(geometry, WrenchAxes::full(), &solver).unwrap();
            let null_space = snapshot.null_space();

            assert_eq!(null_space.rank() + null_space.dim(), rotors as usize);

            if null_space.dim() == 0 {
                continue;
            }

            let product = snapshot.matrix().matrix() * null_space.basis();
            assert!(product.amax() < 1e-6);

            let gram = null_space.basis().transpose() * null_space.basis();
            let identity = nalgebra::DMatrix::identity(null_space.dim(), null_space.dim());
            assert_abs_diff_eq!((gram - identity).amax(), 0.0, epsilon = 1e-9);
        }
    }
}

#[test]
fn coefficients_never_change_the_wrench() {
    let mut rng = StdRng::seed_from_u64(7);
    let snapshot =
        AllocationSnapshot::new(octo(15.0), WrenchAxes::full(), &NullSpaceSolver::default())
            .unwrap();
    let bounds = ThrustBounds::uniform(
        8,
        ThrustLimit {
            min: -1e6,
            max: 1e6,
        },
    )
    .unwrap();
    let allocator = ControlAllocator::default();

    for _ in 0..200 {
        let wrench = random_wrench(&mut rng, 20.0);
        let coefficients = random_coefficients(&mut rng, 2, 10.0);

        let allocation =
            reverse::reverse_solve(wrench, &coefficients, &snapshot, &allocator, &bounds).unwrap();

        assert!(!allocation.is_saturated());
        assert!(allocation.tracking_error().amax() < 1e-9);

        let achieved = forward::forward_solve(snapshot.matrix(), &allocation.thrusts).unwrap();
        let error = wrench - achieved;
        assert!(error.force.length() < 1e-9);
        assert!(error.torque.length() < 1e-9);
    }
}

#[test]
fn bounds_always_hold() {
    let mut rng = StdRng::seed_from_u64(11);
    let snapshot =
        AllocationSnapshot::new(octo(15.0), WrenchAxes::full(), &NullSpaceSolver::default())
            .unwrap();
    let bounds = ThrustBounds::new(
        (0..8)
            .map(|idx| ThrustLimit {
                min: 0.0,
                max: 2.0 + idx as f64 * 0.25,
            })
            .collect(),
    )
    .unwrap();
    let allocator = ControlAllocator::default();

    let mut saturated = 0;
    for _ in 0..200 {
        let wrench = random_wrench(&mut rng, 30.0);
        let coefficients = random_coefficients(&mut rng, 2, 20.0);

        let allocation =
            reverse::reverse_solve(wrench, &coefficients, &snapshot, &allocator, &bounds).unwrap();

        assert!(bounds.contains(&allocation.thrusts));

        if let Some(saturation) = &allocation.saturation {
            saturated += 1;
            assert!(!saturation.clamped_rotors.is_empty());
        }
    }

    assert!(saturated > 0);
}

#[test]
fn solving_twice_spans_the_same_subspace() {
    let mut rng = StdRng::seed_from_u64(3);
    let solver = NullSpaceSolver::default();

    for _ in 0..10 {
        let geometry = random_geometry(&mut rng, 9);
        let first = AllocationSnapshot::new(geometry.clone(), WrenchAxes::full(), &solver).unwrap();
        let second = AllocationSnapshot::new(geometry, WrenchAxes::full(), &solver).unwrap();

        assert!(first
            .null_space()
            .same_subspace(second.null_space(), 1e-9));
        assert_eq!(first.null_space().basis(), second.null_space().basis());
    }

    let planar = AllocationSnapshot::new(octo(15.0), WrenchAxes::planar(), &solver).unwrap();
    let full = AllocationSnapshot::new(octo(15.0), WrenchAxes::full(), &solver).unwrap();
    assert!(!planar.null_space().same_subspace(full.null_space(), 1e-9));
}

#[test]
fn erased_geometry_allocates_identically() {
    let solver = NullSpaceSolver::default();
    let typed = AllocationSnapshot::new(octo(20.0), WrenchAxes::full(), &solver).unwrap();
    let erased =
        AllocationSnapshot::new(octo(20.0).erase(), WrenchAxes::full(), &solver).unwrap();

    assert_eq!(typed.matrix(), erased.matrix());

    let geometry = erased.geometry().clone().unerase::<OctoRotorId>().unwrap();
    assert_eq!(&geometry, typed.geometry());
}

#[test]
fn power_is_non_negative_and_tracked() {
    let mut rng = StdRng::seed_from_u64(99);
    let snapshot =
        AllocationSnapshot::new(octo(15.0), WrenchAxes::full(), &NullSpaceSolver::default())
            .unwrap();
    let bounds = ThrustBounds::uniform(8, ThrustLimit { min: 0.0, max: 6.0 }).unwrap();
    let allocator = ControlAllocator::new(Some(1.0)).unwrap();

    let mut source = Exploration::new(FixedCoefficients::zeros(2, 21), 0.5, 1234);
    let mut monitor = EnergyMonitor::new(snapshot.geometry().thrust_coefficient(), 64);
    let observation = DVector::zeros(21);

    for _ in 0..100 {
        let wrench = Wrench {
            force: dvec3(0.0, 0.0, 12.0),
            torque: dvec3(0.0, 0.0, 0.0),
        } + random_wrench(&mut rng, 1.0);

        let coefficients = source
            .predict(&observation, PredictionMode::Stochastic)
            .unwrap();
        let allocation =
            reverse::reverse_solve(wrench, &coefficients, &snapshot, &allocator, &bounds).unwrap();

        let power = power_proxy(allocation.thrusts.as_slice(), 1.0);
        assert!(power.is_finite());
        assert!(power >= 0.0);

        let (baseline, _) = bounds.clamp(&allocation.baseline).unwrap();
        let sample = monitor.record(&allocation.thrusts, &baseline);
        assert_abs_diff_eq!(sample.power, power, epsilon = 1e-12);
    }

    assert_eq!(monitor.len(), 64);
    assert!(monitor.statistics().unwrap().min >= 0.0);
    assert!(monitor.savings_percent().is_some());
}

#[test]
fn shared_allocation_serves_consistent_pairs() {
    let solver = NullSpaceSolver::default();
    let shared = SharedAllocation::new(
        AllocationSnapshot::new(octo(15.0), WrenchAxes::full(), &solver).unwrap(),
        solver,
    );

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for tilt in [20.0, 25.0, 30.0, 35.0] {
                shared.update(octo(tilt), WrenchAxes::full()).unwrap();
            }
        });

        for _ in 0..50 {
            let snapshot = shared.load();
            let product = snapshot.matrix().matrix() * snapshot.null_space().basis();
            assert!(product.amax() < 1e-9);
        }
    });

    assert_eq!(shared.load().generation(), 4);
}
