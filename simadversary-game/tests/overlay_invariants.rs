use simadversary_game::config::EventTuning;
use simadversary_game::events::EventContext;
use simadversary_game::{
    BundleLoader, CatalogScope, EventCatalog, EventCheck, EventOverlay, GameConfig, GameEngine,
    MemoryPathStore, ModeId, NullUi, Phase, PlayerState, Recovery, SessionSetup, StateApplier,
    Trigger, TriggerScaling,
};
use simadversary_game::{DefenceMaturity, InventoryPolicy, SkillLevel};
use rand::SeedableRng;
use rand::rngs::SmallRng;

fn always_fire_catalog() -> EventCatalog {
    let set = serde_json::json!({
        "events": [
            { "id": "a", "title": "A", "triggers": ["step", "success", "failure", "detection"],
              "base_probability": 1.0, "max_probability": 1.0 },
            { "id": "b", "title": "B", "triggers": ["step", "success", "failure", "detection"],
              "base_probability": 1.0, "max_probability": 1.0, "effects": { "hours": -1 } }
        ]
    });
    let config = GameConfig::load_from_static();
    let scope = CatalogScope::for_mode(&config, &ModeId::new("phishing"));
    EventCatalog::new(EventCatalog::definitions_from_set(
        serde_json::from_value(set).unwrap(),
        "fixture.json",
        &scope,
        &TriggerScaling::identity(),
    ))
}

#[test]
fn one_event_per_call_with_cooldown_and_cap() {
    let config = GameConfig::load_from_static();
    let tuning = EventTuning::default();
    let mut overlay = EventOverlay::with_catalog(always_fire_catalog(), &tuning);
    let mut state = PlayerState::new(
        "analyst",
        ModeId::new("phishing"),
        SkillLevel::OrganisedCrime,
        DefenceMaturity::Medium,
        &config,
    );
    let policy = InventoryPolicy::from_config(&config);
    let mut rng = SmallRng::seed_from_u64(17);
    let mut ui = NullUi;

    let mut fired_at = Vec::new();
    for step in 1..=40_u32 {
        overlay.note_step();
        let context = EventContext::capture(&state, None, None);
        let before = overlay.history().len();
        let mut applier = StateApplier {
            state: &mut state,
            inventory: &policy,
        };
        let check = overlay.check_for_events(Trigger::Step, &context, &mut rng, &mut applier, &mut ui);
        let after = overlay.history().len();
        assert!(after - before <= 1, "at most one event per call");
        if matches!(check, EventCheck::Fired(_)) {
            fired_at.push(step);
        }
    }

    assert!(fired_at.len() <= usize::try_from(tuning.max_events_per_game).unwrap());
    assert!(!fired_at.is_empty());
    for pair in fired_at.windows(2) {
        assert!(pair[1] - pair[0] >= tuning.cooldown_steps);
    }
    let status = overlay.rate_limit_status();
    assert_eq!(status.event_count, tuning.max_events_per_game);
    assert!(!status.can_trigger);
    assert!(status.decay >= tuning.min_global_probability);
    assert_eq!(
        state.resources.time_budget + state.progress.time_spent,
        config.player.hours
    );
}

#[test]
fn bundled_sessions_respect_rate_limits() {
    let engine = GameEngine::new(BundleLoader::embedded(), MemoryPathStore::new());
    let tuning = engine.config().events.clone();
    for seed in 0..32 {
        let setup = SessionSetup::new("analyst", "phishing", seed, engine.config());
        let mut session = engine.create_session_blocking(&setup).unwrap();
        for _ in 0..200 {
            let result = match session.phase() {
                Phase::Over(_) => break,
                Phase::AwaitingChoice => {
                    let Some(pick) = session.availability().into_iter().find(|a| a.enabled) else {
                        break;
                    };
                    let resolution = session.choose(pick.index).unwrap();
                    assert!(resolution.events.len() <= 3, "one event per trigger call");
                    Ok(())
                }
                Phase::Detected { .. } | Phase::Failed { .. } => {
                    if session.recovery_options().contains(&Recovery::UseContingency) {
                        session.use_contingency().map(drop)
                    } else {
                        session.give_up().map(drop)
                    }
                }
            };
            result.unwrap();
        }

        let history = session.engine().overlay().history().to_vec();
        assert!(history.len() <= usize::try_from(tuning.max_events_per_game).unwrap());
        for pair in history.windows(2) {
            assert!(pair[1].game_step - pair[0].game_step >= tuning.cooldown_steps);
        }
        let ids: Vec<&str> = history.iter().map(|event| event.id.as_str()).collect();
        for one_time in ["credential-reset", "analyst-holiday", "reused-password"] {
            assert!(ids.iter().filter(|id| **id == one_time).count() <= 1);
        }
        let summary = session.event_summary();
        assert_eq!(summary.total_events, history.len());
        assert!(summary.catalog.total > 0);
    }
}

#[test]
fn shutdown_cancels_deferred_effects() {
    let set = serde_json::json!({
        "events": [{
            "id": "unstable", "title": "Unstable", "triggers": ["failure"],
            "base_probability": 1.0, "max_probability": 1.0,
            "delayed_effects": [{ "delay": 60, "effects": { "hours": -5 } }]
        }]
    });
    let config = GameConfig::load_from_static();
    let scope = CatalogScope::for_mode(&config, &ModeId::new("phishing"));
    let catalog = EventCatalog::new(EventCatalog::definitions_from_set(
        serde_json::from_value(set).unwrap(),
        "fixture.json",
        &scope,
        &TriggerScaling::identity(),
    ));
    let mut overlay = EventOverlay::with_catalog(catalog, &config.events);
    let mut state = PlayerState::new(
        "analyst",
        ModeId::new("phishing"),
        SkillLevel::OrganisedCrime,
        DefenceMaturity::Medium,
        &config,
    );
    let policy = InventoryPolicy::from_config(&config);
    let context = EventContext::capture(&state, None, None);
    let mut rng = SmallRng::seed_from_u64(3);
    let mut applier = StateApplier {
        state: &mut state,
        inventory: &policy,
    };
    let check = overlay.check_for_events(
        Trigger::Failure,
        &context,
        &mut rng,
        &mut applier,
        &mut NullUi,
    );
    assert!(check.fired().is_some());
    assert_eq!(overlay.pending_effects(), 1);
    assert_eq!(overlay.shutdown(), 1);
    assert_eq!(overlay.advance_clock(3_600, &mut applier, &mut NullUi), 0);
    assert_eq!(state.resources.time_budget, config.player.hours);
}
