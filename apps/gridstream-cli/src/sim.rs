//! Deterministic streaming simulation on a manual clock.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use glam::Vec3;
use gridstream_common::{EntityDefinition, EntityId, EntityKind, KindAttributes, Observer, ObserverId};
use gridstream_stream::{
    BackendCounters, Clock, EntityStreamer, InMemoryBackend, ManualClock, ObserverTable, Scheduler,
    ServerConfig,
};

type SimStreamer = Rc<RefCell<EntityStreamer<InMemoryBackend>>>;

pub struct SimulationParams {
    pub observers: u32,
    pub entities: usize,
    pub ticks: u64,
    pub seed: u64,
}

pub struct KindReport {
    pub kind: EntityKind,
    pub defined: usize,
    pub live: usize,
    pub respawn_pending: usize,
    pub counters: BackendCounters,
}

pub struct SimulationReport {
    pub ticks: u64,
    pub average_tick: Duration,
    pub min_tick: Duration,
    pub max_tick: Duration,
    pub kinds: Vec<KindReport>,
}

// Observers stay inside this square so they always see something.
const ROAM: f32 = 2000.0;
const STEP: f32 = 60.0;
const HOLD_TICKS: u64 = 3;

struct SplitMix(u64);

impl SplitMix {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    fn range(&mut self, min: f32, max: f32) -> f32 {
        let unit = (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32;
        min + unit * (max - min)
    }

    fn point(&mut self, min: f32, max: f32) -> Vec3 {
        Vec3::new(self.range(min, max), self.range(min, max), 0.0)
    }
}

fn definition_for(kind: EntityKind, position: Vec3, persistent: bool) -> EntityDefinition {
    let attributes = match kind {
        EntityKind::Vehicle => KindAttributes::vehicle(),
        EntityKind::Object => KindAttributes::Object {
            draw_distance: 300.0,
        },
        EntityKind::Pickup => KindAttributes::Pickup { pickup_type: 2 },
    };
    let model_id = match kind {
        EntityKind::Vehicle => 411,
        EntityKind::Object => 1225,
        EntityKind::Pickup => 1240,
    };
    let mut definition = EntityDefinition::new(model_id, position, attributes);
    definition.persistent = persistent;
    definition
}

pub fn run(config: &ServerConfig, params: &SimulationParams) -> anyhow::Result<SimulationReport> {
    let clock = ManualClock::new();
    let table = Rc::new(ObserverTable::new());
    let mut rng = SplitMix(params.seed);

    let mut positions: Vec<Vec3> = (0..params.observers).map(|_| rng.point(-ROAM, ROAM)).collect();
    for (i, position) in positions.iter().enumerate() {
        table.upsert(Observer::at(i as u32, *position));
    }

    let mut scheduler = Scheduler::new(config.tick_interval());
    let mut streamers: Vec<SimStreamer> = Vec::new();
    let mut vehicles: Vec<EntityId> = Vec::new();
    for streamer_config in &config.streamers {
        let mut streamer =
            EntityStreamer::new(streamer_config.clone(), InMemoryBackend::new(), table.clone())?;
        for n in 0..params.entities {
            let position = rng.point(streamer_config.min_bound, streamer_config.max_bound);
            let id = streamer.define(definition_for(streamer_config.kind, position, n % 10 == 0))?;
            if streamer_config.kind == EntityKind::Vehicle {
                vehicles.push(id);
            }
        }
        let streamer = Rc::new(RefCell::new(streamer));
        scheduler.add_streamer(streamer.clone())?;
        streamers.push(streamer);
    }
    let vehicle_streamer = streamers
        .iter()
        .find(|s| s.borrow().kind() == EntityKind::Vehicle)
        .cloned();

    scheduler.start(clock.now())?;
    let mut held: Vec<(EntityId, u64)> = Vec::new();
    for tick in 1..=params.ticks {
        let now = clock.advance(config.tick_interval());

        for (i, position) in positions.iter_mut().enumerate() {
            let step = Vec3::new(rng.range(-STEP, STEP), rng.range(-STEP, STEP), 0.0);
            *position = (*position + step).clamp(Vec3::splat(-ROAM), Vec3::splat(ROAM));
            table.move_to(ObserverId(i as u32), *position);
        }

        if let Some(streamer) = &vehicle_streamer {
            let mut streamer = streamer.borrow_mut();
            held.retain(|&(id, until)| {
                if until > tick {
                    return true;
                }
                if let Err(error) = streamer.release(id) {
                    tracing::warn!(entity = %id, %error, "release failed");
                }
                false
            });
            if !vehicles.is_empty() && rng.next_u64() % 3 == 0 {
                let id = vehicles[(rng.next_u64() % vehicles.len() as u64) as usize];
                if streamer.is_live(id) {
                    streamer.acquire(id)?;
                    let moved = streamer.get(id)?.position()
                        + Vec3::new(rng.range(-STEP, STEP), rng.range(-STEP, STEP), 0.0);
                    if streamer.report_position(id, moved).is_err() {
                        tracing::debug!(entity = %id, "vehicle stayed at the map edge");
                    }
                    held.push((id, tick + HOLD_TICKS));
                }
            }
        }

        scheduler.poll(now);
    }

    let kinds = streamers
        .iter()
        .map(|streamer| {
            let streamer = streamer.borrow();
            KindReport {
                kind: streamer.kind(),
                defined: streamer.count(),
                live: streamer.live_count(),
                respawn_pending: streamer.pending_respawns(),
                counters: streamer.backend().counters(),
            }
        })
        .collect();
    scheduler.dispose();

    Ok(SimulationReport {
        ticks: scheduler.tick_count(),
        average_tick: scheduler.frame_timer().average(),
        min_tick: scheduler.frame_timer().min(),
        max_tick: scheduler.frame_timer().max(),
        kinds,
    })
}
