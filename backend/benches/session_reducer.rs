use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use namma_nav::config::NavConfig;
use namma_nav::models::{Coordinate, Destination, Instruction, ManeuverKind, RouteResult};
use namma_nav::session::{reduce, NavEvent, NavigationState};

fn synthetic_route(steps: usize) -> RouteResult {
    let geometry: Vec<Coordinate> = (0..=steps)
        .map(|i| Coordinate::new(11.0168 + i as f64 * 0.0005, 76.9558 + i as f64 * 0.0005))
        .collect();
    let instructions = geometry
        .iter()
        .enumerate()
        .map(|(i, point)| Instruction {
            text: format!("Step {i}"),
            distance_meters: 75.0,
            duration_seconds: 9.0,
            maneuver_point: Some(*point),
            kind: match i {
                0 => ManeuverKind::Depart,
                i if i == steps => ManeuverKind::Arrive,
                _ => ManeuverKind::Continue,
            },
        })
        .collect();
    RouteResult {
        instructions,
        total_distance_meters: 75.0 * steps as f64,
        total_duration_seconds: 9.0 * steps as f64,
        geometry,
    }
}

fn benchmark_position_updates(c: &mut Criterion) {
    let config = NavConfig::default();
    let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
    let mut group = c.benchmark_group("position_update");

    for steps in [4usize, 64, 512] {
        let route = synthetic_route(steps);
        let end = *route.geometry.last().unwrap_or(&Coordinate::new(11.0, 77.0));
        let destination = Destination {
            id: "bench".into(),
            name: "Benchmark".into(),
            lat: end.lat + 0.01,
            lng: end.lng + 0.01,
        };

        let started = reduce(
            &NavigationState::default(),
            NavEvent::Start {
                destination,
                position: Some(route.geometry[0]),
                follow_camera: true,
                now,
            },
            &config,
        )
        .unwrap()
        .state;
        let active = reduce(
            &started,
            NavEvent::RouteResolved {
                session_id: started.session_id,
                outcome: Ok(route.clone()),
                now,
            },
            &config,
        )
        .unwrap()
        .state;

        group.bench_with_input(BenchmarkId::from_parameter(steps), &route, |b, route| {
            b.iter(|| {
                let mut state = active.clone();
                for point in &route.geometry {
                    state = reduce(
                        &state,
                        NavEvent::PositionUpdate {
                            position: *point,
                            now,
                        },
                        &config,
                    )
                    .unwrap()
                    .state;
                }
                black_box(state.current_instruction_index)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_position_updates);
criterion_main!(benches);
