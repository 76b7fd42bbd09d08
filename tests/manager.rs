use std::sync::{Arc, Mutex};

use netprofile_rs::{
    DisableReason,
    EapMethod,
    EnterpriseConfig,
    EventHandler,
    InMemoryStore,
    ManualClock,
    Masking,
    MacAddress,
    Observation,
    ProfileEvent,
    ProfileInput,
    ProfileKey,
    ProfileManager,
    ProfileManagerConfig,
    ProfileManagerError,
    ProxySettings,
    SecurityType,
    StaticTenants,
};

const APP: u32 = 10_001;
const SECOND_TENANT_APP: u32 = 110_001;
const PACKAGE: &str = "com.example.app";
const START_MS: i64 = 1_700_000_000_000;

#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<String>>,
}

impl RecordingHandler {
    fn names(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, event: &ProfileEvent) {
        let name = match event {
            ProfileEvent::Added(_) => "added".to_string(),
            ProfileEvent::Updated(_) => "updated".to_string(),
            ProfileEvent::Removed(_) => "removed".to_string(),
            ProfileEvent::Enabled(_) => "enabled".to_string(),
            ProfileEvent::TemporarilyDisabled { reason, .. } => format!("temp:{}", reason.name()),
            ProfileEvent::PermanentlyDisabled { reason, .. } => format!("perm:{}", reason.name()),
            ProfileEvent::Reloaded { count, .. } => format!("reloaded:{}", count),
        };
        self.seen.lock().unwrap().push(name);
    }
}

fn dhcp_threshold_config() -> ProfileManagerConfig {
    ProfileManagerConfig::from_json_str(r#"{ "reason_overrides": { "DhcpFailure": { "threshold": 3 } } }"#)
        .unwrap()
}

fn loaded(builder: netprofile_rs::ProfileManagerBuilder) -> ProfileManager {
    let mut manager = builder.disable_logging_handler().build().unwrap();
    manager.load_from_store().unwrap();
    manager
}

#[test]
fn selection_lifecycle_for_home_network() {
    let events = Arc::new(RecordingHandler::default());
    let mut manager = loaded(
        ProfileManager::builder()
            .with_config(dhcp_threshold_config())
            .with_clock(Arc::new(ManualClock::new(0, START_MS)))
            .with_handler(events.clone()),
    );

    // Passphrases must be 8..=63 ASCII characters, so a three-letter one is rejected.
    let added = manager
        .add_or_update(&ProfileInput::psk("Home", "password1"), APP, PACKAGE)
        .unwrap();
    assert!(added.is_new);
    let id = added.id;
    assert!(manager.get(id, Masking::None).unwrap().selection.is_permanently_disabled());

    assert!(manager.enable(id, true, APP, PACKAGE));
    assert_eq!(manager.last_selected(), Some(id));
    assert_eq!(manager.last_selected_key(), Some(ProfileKey::new("Home", SecurityType::Psk)));

    for call in 1..=4 {
        manager.update_selection_status(id, DisableReason::DhcpFailure);
        let selection = manager.get(id, Masking::None).unwrap().selection;
        if call < 3 {
            assert!(selection.is_enabled(), "call {call} should only count");
        } else {
            assert!(selection.is_temporarily_disabled());
            assert_eq!(selection.reason(), DisableReason::DhcpFailure);
        }
    }
    assert_eq!(
        manager.get(id, Masking::None).unwrap().selection.counter(DisableReason::DhcpFailure),
        4
    );

    assert!(manager.enable(id, false, APP, PACKAGE));
    assert_eq!(
        manager.get(id, Masking::None).unwrap().selection.counter(DisableReason::DhcpFailure),
        0
    );

    assert!(manager.disable(id, APP, PACKAGE));
    assert_eq!(manager.last_selected(), None);
    assert!(manager.remove(id, APP, PACKAGE));

    assert_eq!(
        events.names(),
        vec![
            "reloaded:0",
            "added",
            "enabled",
            "temp:NETWORK_SELECTION_DISABLED_DHCP_FAILURE",
            "enabled",
            "perm:NETWORK_SELECTION_DISABLED_BY_WIFI_MANAGER",
            "removed",
        ]
    );
}

#[test]
fn shared_gateway_links_and_unlinks() {
    let mut manager = loaded(ProfileManager::builder().with_clock(Arc::new(ManualClock::new(0, START_MS))));
    let a = manager
        .add_or_update(&ProfileInput::psk("Upstairs", "password1"), APP, PACKAGE)
        .unwrap()
        .id;
    let b = manager
        .add_or_update(&ProfileInput::psk("Downstairs", "password1"), APP, PACKAGE)
        .unwrap()
        .id;
    let sighting = |ssid: &str, octet: u8| {
        Observation::new(
            ssid,
            MacAddress::new([0x10, 0x20, 0x30, octet, 0x00, 0x01]),
            SecurityType::Psk,
            -60,
            2412,
            START_MS,
        )
    };

    manager.set_default_gateway(a, "aa:bb:cc:dd:ee:ff");
    manager.set_default_gateway(b, "aa:bb:cc:dd:ee:ff");
    manager.cache_observation(a, sighting("Upstairs", 0x01));
    let key_a = ProfileKey::new("Upstairs", SecurityType::Psk);
    let key_b = ProfileKey::new("Downstairs", SecurityType::Psk);
    assert!(manager.get(a, Masking::None).unwrap().linked.contains(&key_b));
    assert!(manager.get(b, Masking::None).unwrap().linked.contains(&key_a));

    manager.set_default_gateway(b, "11:22:33:44:55:66");
    manager.cache_observation(a, sighting("Upstairs", 0x02));
    assert!(manager.get(a, Masking::None).unwrap().linked.is_empty());
    assert!(manager.get(b, Masking::None).unwrap().linked.is_empty());
}

#[test]
fn tenant_switch_swaps_private_profiles() {
    let store = InMemoryStore::new();
    let mut manager = loaded(
        ProfileManager::builder()
            .with_store(Box::new(store.clone()))
            .with_tenants(Arc::new(StaticTenants::unlocked([0, 1]))),
    );
    manager
        .add_or_update(&ProfileInput::psk("Everyone", "password1"), APP, PACKAGE)
        .unwrap();
    let mut private = ProfileInput::psk("Mine", "password1");
    private.shared = false;
    let mine = manager.add_or_update(&private, APP, PACKAGE).unwrap().id;

    let removed = manager.handle_tenant_switch(1);
    assert!(removed.contains(&mine));
    assert_eq!(manager.current_tenant(), 1);
    assert_eq!(manager.len(), 1);
    assert!(matches!(
        manager.add_or_update(&ProfileInput::open("Nope"), APP, PACKAGE),
        Err(ProfileManagerError::ForeignTenant(APP))
    ));

    let mut theirs = ProfileInput::psk("Theirs", "password1");
    theirs.shared = false;
    manager.add_or_update(&theirs, SECOND_TENANT_APP, PACKAGE).unwrap();
    assert_eq!(store.snapshot(1).unwrap().tenant.profiles.len(), 1);

    manager.handle_tenant_switch(0);
    let mut ssids: Vec<String> = manager
        .list(false, Masking::Full)
        .into_iter()
        .map(|p| p.ssid)
        .collect();
    ssids.sort();
    assert_eq!(ssids, vec!["Everyone".to_string(), "Mine".to_string()]);
}

#[test]
fn locked_tenant_is_loaded_on_unlock() {
    let store = InMemoryStore::new();
    {
        let mut manager = loaded(ProfileManager::builder().with_store(Box::new(store.clone())));
        manager
            .add_or_update(&ProfileInput::psk("Everyone", "password1"), APP, PACKAGE)
            .unwrap();
        let mut private = ProfileInput::psk("Mine", "password1");
        private.shared = false;
        manager.add_or_update(&private, APP, PACKAGE).unwrap();
    }

    let tenants = Arc::new(StaticTenants::default());
    let mut manager = loaded(
        ProfileManager::builder()
            .with_store(Box::new(store.clone()))
            .with_tenants(tenants.clone()),
    );
    assert_eq!(manager.len(), 1);

    // A save while locked must not wipe the private section.
    manager.save_to_store(true).unwrap();
    assert_eq!(store.snapshot(0).unwrap().tenant.profiles.len(), 1);

    tenants.unlock(0);
    manager.handle_tenant_unlock(0);
    assert_eq!(manager.len(), 2);
}

#[test]
fn unlock_before_first_read_is_deferred() {
    let store = InMemoryStore::new();
    {
        let mut manager = loaded(ProfileManager::builder().with_store(Box::new(store.clone())));
        let mut private = ProfileInput::psk("Mine", "password1");
        private.shared = false;
        manager.add_or_update(&private, APP, PACKAGE).unwrap();
    }

    let mut manager = ProfileManager::builder()
        .with_store(Box::new(store))
        .with_tenants(Arc::new(StaticTenants::default()))
        .disable_logging_handler()
        .build()
        .unwrap();
    manager.handle_tenant_unlock(0);
    assert_eq!(manager.load_from_store().unwrap(), 1);
}

#[test]
fn sim_identities_are_reset() {
    let mut manager = loaded(ProfileManager::builder());
    let sim_profile = |ssid: &str, anonymous: &str| {
        let mut input = ProfileInput::new(ssid, SecurityType::Eap);
        input.enterprise = Some(EnterpriseConfig {
            identity: "1310260000000000@wlan.example".into(),
            anonymous_identity: anonymous.into(),
            ..EnterpriseConfig::new(EapMethod::Sim)
        });
        input
    };
    let realm = manager
        .add_or_update(&sim_profile("Carrier", "anonymous@wlan.example"), 1000, "android")
        .unwrap()
        .id;
    let custom = manager
        .add_or_update(&sim_profile("Carrier2", "someone@wlan.example"), 1000, "android")
        .unwrap()
        .id;

    manager.reset_sim_profiles();
    let realm = manager.get(realm, Masking::None).unwrap().enterprise.unwrap();
    assert!(realm.identity.is_empty());
    assert_eq!(realm.anonymous_identity, "anonymous@wlan.example");
    let custom = manager.get(custom, Masking::None).unwrap().enterprise.unwrap();
    assert!(custom.anonymous_identity.is_empty());
}

#[test]
fn bulk_removals() {
    let mut manager = loaded(ProfileManager::builder());
    manager
        .add_or_update(&ProfileInput::psk("One", "password1"), APP, PACKAGE)
        .unwrap();
    manager
        .add_or_update(&ProfileInput::psk("Two", "password1"), APP, "com.other")
        .unwrap();
    let mut suggestion = ProfileInput::open("Suggested").ephemeral();
    suggestion.from_suggestion = true;
    manager.add_or_update(&suggestion, APP, PACKAGE).unwrap();

    assert!(manager.remove_suggestion(&ProfileKey::new("Suggested", SecurityType::Open)));
    assert_eq!(manager.remove_for_app(APP, PACKAGE).len(), 1);
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.remove_for_tenant(0).len(), 1);
    assert!(manager.is_empty());
    assert!(!manager.remove_all_ephemeral_or_passpoint());
}

#[test]
fn rejected_saved_add_keeps_ephemeral_profile() {
    let events = Arc::new(RecordingHandler::default());
    let mut manager = loaded(ProfileManager::builder().with_handler(events.clone()));
    let ephemeral = manager
        .add_or_update(&ProfileInput::open("Cafe").ephemeral(), 1000, "android")
        .unwrap()
        .id;

    let mut bad_proxy = ProfileInput::open("Cafe");
    bad_proxy.ip.proxy = ProxySettings::Static {
        host: String::new(),
        port: 0,
        exclusions: Vec::new(),
    };
    assert!(matches!(
        manager.add_or_update(&bad_proxy, 1000, "android"),
        Err(ProfileManagerError::Validation(_))
    ));

    let mut no_randomization = ProfileInput::open("Cafe");
    no_randomization.randomization = netprofile_rs::RandomizationSetting::None;
    assert!(matches!(
        manager.add_or_update(&no_randomization, APP, PACKAGE),
        Err(ProfileManagerError::RandomizationPermissionDenied(APP))
    ));

    let kept = manager.get(ephemeral, Masking::None).unwrap();
    assert!(kept.ephemeral);
    assert_eq!(manager.len(), 1);
    assert!(!events.names().iter().any(|name| name == "removed"));
}

#[test]
fn system_private_profile_lives_in_the_current_tenant() {
    let store = InMemoryStore::new();
    let mut manager = loaded(
        ProfileManager::builder()
            .with_store(Box::new(store.clone()))
            .with_tenants(Arc::new(StaticTenants::unlocked([0, 1]))),
    );
    manager.handle_tenant_switch(1);

    let mut office = ProfileInput::psk("Office", "password1");
    office.shared = false;
    let id = manager.add_or_update(&office, 1000, "android").unwrap().id;
    assert_eq!(manager.get(id, Masking::None).unwrap().ssid, "Office");
    assert_eq!(store.snapshot(1).unwrap().tenant.profiles.len(), 1);
    assert!(store.snapshot(1).unwrap().shared.is_empty());

    let removed = manager.handle_tenant_switch(0);
    assert!(removed.contains(&id));
    assert!(manager.is_empty());

    manager.handle_tenant_switch(1);
    let ssids: Vec<String> = manager
        .list(false, Masking::Full)
        .into_iter()
        .map(|p| p.ssid)
        .collect();
    assert_eq!(ssids, vec!["Office".to_string()]);
}

#[test]
fn saving_a_dismissed_ssid_enables_it_again() {
    let mut manager = loaded(ProfileManager::builder().with_clock(Arc::new(ManualClock::new(0, START_MS))));
    let ephemeral = manager
        .add_or_update(&ProfileInput::open("Cafe").ephemeral(), 1000, "android")
        .unwrap()
        .id;
    manager.enable(ephemeral, false, 1000, "android");
    manager.disable_ephemeral("Cafe").unwrap();
    assert!(manager.was_ephemeral_deleted("Cafe"));

    let saved = manager
        .add_or_update(&ProfileInput::open("Cafe"), 1000, "android")
        .unwrap();
    assert!(saved.is_new);
    assert!(manager.get(ephemeral, Masking::None).is_none());
    assert!(manager.get(saved.id, Masking::None).unwrap().selection.is_enabled());
    assert!(!manager.was_ephemeral_deleted("Cafe"));
}

#[test]
fn partial_scan_respects_channel_cap() {
    let config = ProfileManagerConfig::from_json_str(r#"{ "partial_scan_max_channels": 2 }"#).unwrap();
    let mut manager = loaded(
        ProfileManager::builder()
            .with_config(config)
            .with_clock(Arc::new(ManualClock::new(0, START_MS))),
    );
    let id = manager
        .add_or_update(&ProfileInput::psk("Home", "password1"), APP, PACKAGE)
        .unwrap()
        .id;
    for (octet, frequency, age) in [(1u8, 5180u32, 0i64), (2, 5745, 1), (3, 2437, 2)] {
        manager.cache_observation(
            id,
            Observation::new(
                "Home",
                MacAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, octet]),
                SecurityType::Psk,
                -50,
                frequency,
                START_MS - age,
            ),
        );
    }

    assert_eq!(manager.channels_for_partial_scan(id, 60_000, 2412), Some(vec![2412, 5180]));
    assert_eq!(manager.channels_for_partial_scan(id, 60_000, 0), Some(vec![5180, 5745]));
}

fn preferred_order(recency_sorting: bool) -> Vec<String> {
    let clock = Arc::new(ManualClock::new(0, START_MS));
    let mut config = ProfileManagerConfig::default();
    config.pno_recency_sorting = recency_sorting;
    let mut manager = loaded(
        ProfileManager::builder()
            .with_config(config)
            .with_clock(clock.clone()),
    );
    let mut add = |ssid: &str| {
        let id = manager
            .add_or_update(&ProfileInput::psk(ssid, "password1"), 1000, "android")
            .unwrap()
            .id;
        manager.enable(id, false, 1000, "android");
        id
    };
    let _never = add("Never");
    let quiet = add("Quiet");
    let seen = add("Seen");
    let busy = add("Busy");

    manager.record_connected(busy);
    manager.record_connected(busy);
    clock.advance(1_000);
    manager.record_connected(seen);
    clock.advance(1_000);
    manager.record_connected(quiet);
    let candidate = Observation::new(
        "Seen",
        MacAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]),
        SecurityType::Psk,
        -50,
        2412,
        START_MS,
    );
    manager.set_candidate(seen, candidate, 10);

    manager
        .build_preferred_network_list()
        .into_iter()
        .map(|network| network.ssid)
        .collect()
}

#[test]
fn preferred_list_breaks_ties_then_hoists_latest() {
    assert_eq!(preferred_order(false), vec!["Busy", "Seen", "Quiet", "Never"]);
    assert_eq!(preferred_order(true), vec!["Quiet", "Busy", "Seen", "Never"]);
}
