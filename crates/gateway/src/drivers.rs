use std::collections::HashMap;
use std::sync::OnceLock;

use model::drivers::{
    AssignmentsByBlock, BlockGroupEntry, BlockWindow, CachedBlockSelection, DriverInfo,
    ShiftEntry, VehicleDriverEntry, VehicleDriversResult,
};
use ondemand::OnDemandVehicle;
use regex::Regex;
use transloc::model::BlockGroup;

/// Route keyword -> blocks that may run it.
pub const ROUTE_TO_BLOCKS: &[(&str, &[&str])] = &[
    ("green", &["01", "02"]),
    ("night pilot", &["03", "04"]),
    ("orange", &["05", "06", "07", "08"]),
    ("gold", &["09", "10", "11", "12"]),
    ("yellow", &["09", "10", "11", "12"]),
    ("silver", &["13", "14"]),
    (
        "blue",
        &["15", "16", "17", "18", "20", "21", "22", "23", "24", "25", "26"],
    ),
    ("red", &["20", "21", "22", "23", "24", "25", "26"]),
];

/// Dedicated blocks that outrank the shared pool for a route.
pub const ROUTE_PREFERRED_BLOCKS: &[(&str, &[&str])] =
    &[("blue", &["15", "16", "17", "18"])];

/// Raw feed labels that actually mean an interlined pair.
pub const INTERLINED_ALIASES: &[(&str, &str)] = &[
    ("[01]", "[01]/[04]"),
    ("[03]", "[05]/[03]"),
    ("[04]", "[01]/[04]"),
    ("[05]", "[05]/[03]"),
    ("[06]", "[22]/[06]"),
    ("[10]", "[20]/[10]"),
    ("[15]", "[26]/[15]"),
    ("[16] AM", "[21]/[16] AM"),
    ("[17]", "[23]/[17]"),
    ("[18] AM", "[24]/[18] AM"),
    ("[20] AM", "[20]/[10]"),
    ("[21] AM", "[21]/[16] AM"),
    ("[22] AM", "[22]/[06]"),
    ("[23]", "[23]/[17]"),
    ("[24] AM", "[24]/[18] AM"),
    ("[26] AM", "[26]/[15]"),
];

pub const ONDEMAND_BLOCK_NAMES: [&str; 2] = ["OnDemand Driver", "OnDemand EB"];

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d{1,2})\]").unwrap())
}

/// Split an interlined block label into its zero-padded block numbers.
pub fn split_interlined_blocks(label: &str) -> Vec<String> {
    if label.is_empty() {
        return Vec::new();
    }
    label
        .split('/')
        .filter_map(|part| {
            let caps = bracket_re().captures(part)?;
            let number: u32 = caps[1].parse().ok()?;
            Some(format!("{number:02}"))
        })
        .collect()
}

/// Convert a raw feed label to its canonical interlined form, when one
/// exists.
pub fn canonical_block_label(raw: &str) -> String {
    let trimmed = raw.trim();
    for (alias, canonical) in INTERLINED_ALIASES {
        if *alias == trimmed {
            return (*canonical).to_owned();
        }
    }
    trimmed.to_owned()
}

pub fn blocks_for_route(route_name: Option<&str>) -> Option<&'static [&'static str]> {
    let lower = route_name?.to_lowercase();
    ROUTE_TO_BLOCKS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, blocks)| *blocks)
}

pub fn preferred_blocks_for_route(route_name: Option<&str>) -> Option<&'static [&'static str]> {
    let lower = route_name?.to_lowercase();
    ROUTE_PREFERRED_BLOCKS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, blocks)| *blocks)
}

pub fn normalize_driver_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// All shifts on a block whose window contains `now`, in ascending start
/// order. During a handoff this legitimately returns both drivers.
pub fn find_current_drivers(
    block_number: &str,
    assignments: &AssignmentsByBlock,
    now_ts: i64,
) -> Vec<ShiftEntry> {
    let Some(periods) = assignments.get(block_number) else {
        return Vec::new();
    };
    let mut matching: Vec<ShiftEntry> = periods
        .values()
        .flatten()
        .filter(|shift| shift.start_ts <= now_ts && now_ts < shift.end_ts)
        .cloned()
        .collect();
    matching.sort_by_key(|shift| shift.start_ts);
    matching
}

/// Collapse raw block groups into per-vehicle trip windows. Interlined
/// windows are attributed to a specific sub-block by matching the trip's
/// route against the allowed-blocks table, preferring the dedicated subset,
/// with the group's block ordering as the fallback.
pub fn build_block_windows(
    groups: &[BlockGroup],
    route_names: &HashMap<i64, String>,
) -> HashMap<String, Vec<BlockWindow>> {
    let mut windows: HashMap<String, Vec<BlockWindow>> = HashMap::new();

    for group in groups {
        let Some(raw_label) = group.block_group_id.as_deref() else {
            continue;
        };
        let label = canonical_block_label(raw_label);
        if label.is_empty() {
            continue;
        }
        let Some(vehicle_id) = group.vehicle_id else {
            continue;
        };
        let vid = vehicle_id.to_string();
        let subs = split_interlined_blocks(&label);

        for (block_index, block) in group.blocks.iter().enumerate() {
            for trip in &block.trips {
                let start_ts = trip.start_time_utc.unwrap_or(0);
                let end_ts = trip.end_time_utc.unwrap_or(0);

                let sub_block = if subs.len() > 1 {
                    let trip_route = trip.route_description.clone().or_else(|| {
                        trip.route_id.and_then(|rid| route_names.get(&rid).cloned())
                    });
                    attribute_sub_block(&subs, trip_route.as_deref(), block_index)
                } else {
                    subs.first().cloned()
                };

                windows.entry(vid.clone()).or_default().push(BlockWindow {
                    block_label: label.clone(),
                    sub_block,
                    start_ts,
                    end_ts,
                });
            }
        }
    }

    windows
}

fn attribute_sub_block(
    subs: &[String],
    route_name: Option<&str>,
    block_index: usize,
) -> Option<String> {
    if let Some(preferred) = preferred_blocks_for_route(route_name) {
        if let Some(sub) = subs.iter().find(|sub| preferred.contains(&sub.as_str())) {
            return Some(sub.clone());
        }
    }
    if let Some(allowed) = blocks_for_route(route_name) {
        if let Some(sub) = subs.iter().find(|sub| allowed.contains(&sub.as_str())) {
            return Some(sub.clone());
        }
    }
    // No route signal: fall back to the group's own block ordering.
    subs.get(block_index).or_else(|| subs.first()).cloned()
}

/// Flatten block groups into display rows for the dispatcher block listing.
pub fn block_group_entries(
    groups: &[BlockGroup],
    route_names: &HashMap<i64, String>,
    route_colors: &HashMap<i64, Option<String>>,
) -> Vec<BlockGroupEntry> {
    let mut entries = Vec::new();
    for group in groups {
        let Some(raw_label) = group.block_group_id.as_deref() else {
            continue;
        };
        let label = canonical_block_label(raw_label);
        for block in &group.blocks {
            let route_id = block.trips.iter().find_map(|trip| trip.route_id);
            entries.push(BlockGroupEntry {
                block_id: block.block_id.clone().unwrap_or_else(|| label.clone()),
                block_group_id: label.clone(),
                vehicle_id: group.vehicle_id.map(|id| id.to_string()),
                vehicle_name: group.vehicle_name.clone(),
                route_id: route_id.map(|rid| rid.to_string()),
                route_name: route_id.and_then(|rid| route_names.get(&rid)).cloned(),
                route_color: route_id
                    .and_then(|rid| route_colors.get(&rid))
                    .cloned()
                    .flatten(),
            });
        }
    }
    entries.sort_by(|a, b| a.block_id.cmp(&b.block_id));
    entries
}

/// Observed (bus name, block id) pairs for mileage bookkeeping.
pub fn block_pairs_for_mileage(groups: &[BlockGroup]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for group in groups {
        let Some(name) = group.vehicle_name.as_deref() else {
            continue;
        };
        for block in &group.blocks {
            let block_id = block
                .block_id
                .clone()
                .or_else(|| group.block_group_id.clone());
            if let Some(block_id) = block_id {
                pairs.push((name.to_owned(), block_id));
            }
        }
    }
    pairs
}

/// Pick the block each vehicle is on right now: the window containing `now`,
/// or any window one of whose sub-blocks has an active driver shift (buses
/// staged before or after revenue service).
pub fn select_blocks_for_vehicles(
    windows: &HashMap<String, Vec<BlockWindow>>,
    assignments: &AssignmentsByBlock,
    now_ts: i64,
) -> HashMap<String, String> {
    let mut selected = HashMap::new();

    'vehicles: for (vid, vehicle_windows) in windows {
        for window in vehicle_windows {
            if window.start_ts <= now_ts && now_ts < window.end_ts {
                selected.insert(vid.clone(), window.block_label.clone());
                continue 'vehicles;
            }
        }
        for window in vehicle_windows {
            for sub in split_interlined_blocks(&window.block_label) {
                if !find_current_drivers(&sub, assignments, now_ts).is_empty() {
                    selected.insert(vid.clone(), window.block_label.clone());
                    continue 'vehicles;
                }
            }
        }
    }

    selected
}

/// Vehicle id -> display block for dashboards: the attributed sub-block of
/// the window in effect now, formatted back into bracket form.
pub fn plain_language_blocks(
    windows: &HashMap<String, Vec<BlockWindow>>,
    now_ts: i64,
) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    for (vid, vehicle_windows) in windows {
        for window in vehicle_windows {
            if window.start_ts <= now_ts && now_ts < window.end_ts {
                let label = match &window.sub_block {
                    Some(sub) => format!("[{sub}]"),
                    None => window.block_label.clone(),
                };
                labels.insert(vid.clone(), label);
                break;
            }
        }
    }
    labels
}

pub struct ResolverInputs<'a> {
    pub block_windows: &'a HashMap<String, Vec<BlockWindow>>,
    pub assignments: &'a AssignmentsByBlock,
    pub vehicle_names: &'a HashMap<String, String>,
    pub vehicle_routes: &'a HashMap<String, String>,
    pub ondemand_vehicles: &'a [OnDemandVehicle],
    pub now_ts: i64,
}

/// Join block windows, driver shifts and on-demand positions into the
/// vehicle -> drivers map served to dashboards. `block_cache` carries block
/// selections across ticks so staged buses keep their block.
pub fn resolve_vehicle_drivers(
    inputs: &ResolverInputs,
    block_cache: &mut HashMap<String, CachedBlockSelection>,
) -> VehicleDriversResult {
    let mut vehicle_drivers: HashMap<String, VehicleDriverEntry> = HashMap::new();

    // Standing on-demand position entries.
    for block_name in ONDEMAND_BLOCK_NAMES {
        let current = find_current_drivers(block_name, inputs.assignments, inputs.now_ts);
        if !current.is_empty() {
            vehicle_drivers.insert(
                block_name.to_owned(),
                VehicleDriverEntry {
                    vehicle_id: block_name.to_owned(),
                    block: block_name.to_owned(),
                    drivers: current.iter().map(DriverInfo::from_shift).collect(),
                    vehicle_name: None,
                },
            );
        }
    }

    let selected =
        select_blocks_for_vehicles(inputs.block_windows, inputs.assignments, inputs.now_ts);
    for (vid, block_label) in selected {
        let entry = build_vehicle_entry(&vid, &block_label, inputs, block_cache);
        vehicle_drivers.insert(vid, entry);
    }

    // Paratransit vehicles matched to their drivers by name.
    for vehicle in inputs.ondemand_vehicles {
        let Some(vid) = vehicle.vehicle_id_string() else {
            continue;
        };
        let Some(driver_name) = vehicle.driver_name.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };
        if let Some((shift, block)) =
            find_ondemand_driver_by_name(driver_name, inputs.assignments, inputs.now_ts)
        {
            vehicle_drivers.insert(
                vid.clone(),
                VehicleDriverEntry {
                    vehicle_id: vid,
                    block,
                    drivers: vec![DriverInfo::from_shift(&shift)],
                    vehicle_name: vehicle.call_name.clone(),
                },
            );
        }
    }

    VehicleDriversResult {
        fetched_at: inputs.now_ts,
        vehicle_drivers,
    }
}

fn build_vehicle_entry(
    vid: &str,
    block_label: &str,
    inputs: &ResolverInputs,
    block_cache: &mut HashMap<String, CachedBlockSelection>,
) -> VehicleDriverEntry {
    let block_numbers = split_interlined_blocks(block_label);
    let vehicle_name = inputs.vehicle_names.get(vid).cloned();
    let current_route = inputs.vehicle_routes.get(vid).map(String::as_str);

    let allowed = blocks_for_route(current_route);
    let preferred = preferred_blocks_for_route(current_route);

    let mut drivers_by_block: HashMap<String, Vec<ShiftEntry>> = HashMap::new();
    for number in &block_numbers {
        let drivers = find_current_drivers(number, inputs.assignments, inputs.now_ts);
        if !drivers.is_empty() {
            drivers_by_block.insert(number.clone(), drivers);
        }
    }

    let mut selected: Option<String> = None;
    let mut position_name: Option<String> = None;
    let mut used_cache = false;

    if !drivers_by_block.is_empty() {
        // 1. Dedicated blocks for the current route.
        if let Some(preferred) = preferred {
            selected = block_numbers
                .iter()
                .find(|n| preferred.contains(&n.as_str()) && drivers_by_block.contains_key(*n))
                .cloned();
        }
        // 2. Any block allowed on the current route.
        if selected.is_none() {
            if let Some(allowed) = allowed {
                selected = block_numbers
                    .iter()
                    .find(|n| allowed.contains(&n.as_str()) && drivers_by_block.contains_key(*n))
                    .cloned();
            }
        }
        // 3. The cached selection, while its shift is still running.
        if selected.is_none() {
            if let Some(cached) = block_cache.get(vid) {
                if cached.shift_end_ts > inputs.now_ts
                    && drivers_by_block.contains_key(&cached.block_number)
                {
                    selected = Some(cached.block_number.clone());
                    used_cache = true;
                }
            }
        }
        // 4. Whichever sub-block has the most recent driver start.
        if selected.is_none() {
            let mut best_start = i64::MIN;
            for (number, drivers) in &drivers_by_block {
                for driver in drivers {
                    if driver.start_ts > best_start {
                        best_start = driver.start_ts;
                        selected = Some(number.clone());
                    }
                }
            }
        }

        if let Some(number) = &selected {
            position_name = drivers_by_block
                .get(number)
                .and_then(|drivers| drivers.iter().max_by_key(|d| d.start_ts))
                .and_then(|d| d.position_name.clone());
        }
    }

    let mut all_drivers: Vec<DriverInfo> = Vec::new();
    let mut max_shift_end = 0i64;
    if let Some(number) = &selected {
        if let Some(drivers) = drivers_by_block.get(number) {
            let mut seen: Vec<(String, i64, i64)> = Vec::new();
            for driver in drivers {
                let key = (driver.name.clone(), driver.start_ts, driver.end_ts);
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key);
                all_drivers.push(DriverInfo::from_shift(driver));
                max_shift_end = max_shift_end.max(driver.end_ts);
            }
        }
    }
    all_drivers.sort_by_key(|d| d.shift_start);

    if let (Some(number), false) = (&selected, used_cache) {
        if max_shift_end > inputs.now_ts {
            block_cache.insert(
                vid.to_owned(),
                CachedBlockSelection {
                    block_number: number.clone(),
                    position_name: position_name.clone(),
                    shift_end_ts: max_shift_end,
                },
            );
        }
    }

    VehicleDriverEntry {
        vehicle_id: vid.to_owned(),
        block: position_name.unwrap_or_else(|| block_label.to_owned()),
        drivers: all_drivers,
        vehicle_name,
    }
}

fn find_ondemand_driver_by_name(
    driver_name: &str,
    assignments: &AssignmentsByBlock,
    now_ts: i64,
) -> Option<(ShiftEntry, String)> {
    let wanted = normalize_driver_name(driver_name);
    if wanted.is_empty() {
        return None;
    }

    for block_name in ONDEMAND_BLOCK_NAMES {
        for shift in find_current_drivers(block_name, assignments, now_ts) {
            if normalize_driver_name(&shift.name) == wanted {
                let block = shift
                    .position_name
                    .clone()
                    .unwrap_or_else(|| block_name.to_owned());
                return Some((shift, block));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::drivers::Period;

    #[test]
    fn splits_interlined_labels() {
        assert_eq!(split_interlined_blocks("[01]/[04]"), vec!["01", "04"]);
        assert_eq!(split_interlined_blocks("[21]/[16] AM"), vec!["21", "16"]);
        assert_eq!(split_interlined_blocks("[1]/[4]"), vec!["01", "04"]);
        assert_eq!(
            split_interlined_blocks("[01]/[04]/[05]"),
            vec!["01", "04", "05"]
        );
        assert_eq!(split_interlined_blocks("[16] AM"), vec!["16"]);
        assert!(split_interlined_blocks("").is_empty());
    }

    #[test]
    fn aliases_map_to_canonical_interlined_labels() {
        assert_eq!(canonical_block_label("[01]"), "[01]/[04]");
        assert_eq!(canonical_block_label("[20] AM"), "[20]/[10]");
        assert_eq!(canonical_block_label("[16] AM"), "[21]/[16] AM");
        assert_eq!(canonical_block_label("[02]"), "[02]");
    }

    #[test]
    fn route_tables_match_by_keyword() {
        assert_eq!(
            blocks_for_route(Some("Green Line")),
            Some(["01", "02"].as_slice())
        );
        assert_eq!(
            blocks_for_route(Some("NIGHT PILOT")),
            Some(["03", "04"].as_slice())
        );
        assert_eq!(
            preferred_blocks_for_route(Some("Blue Line")),
            Some(["15", "16", "17", "18"].as_slice())
        );
        assert_eq!(blocks_for_route(Some("Trolley")), None);
        assert_eq!(blocks_for_route(None), None);
    }

    fn shift(name: &str, start_ts: i64, end_ts: i64, position: &str) -> ShiftEntry {
        ShiftEntry {
            name: name.to_owned(),
            start_ts,
            end_ts,
            start_label: String::new(),
            end_label: String::new(),
            color_id: None,
            position_name: Some(position.to_owned()),
        }
    }

    const HOUR: i64 = 3_600_000;

    /// Assignments for the driver-selection scenarios: block 01 has an AM
    /// and a PM driver, block 04 has one all-day driver.
    fn assignments() -> AssignmentsByBlock {
        let mut map = AssignmentsByBlock::new();
        let mut block_01 = HashMap::new();
        block_01.insert(
            Period::Any,
            vec![
                shift("D1", 6 * HOUR, 12 * HOUR, "[01]"),
                shift("D2", 13 * HOUR, 18 * HOUR, "[01]"),
            ],
        );
        map.insert("01".to_owned(), block_01);

        let mut block_04 = HashMap::new();
        block_04.insert(Period::Any, vec![shift("D3", 6 * HOUR, 18 * HOUR, "[04]")]);
        map.insert("04".to_owned(), block_04);
        map
    }

    fn windows_for(vid: &str, label: &str) -> HashMap<String, Vec<BlockWindow>> {
        let mut map = HashMap::new();
        map.insert(
            vid.to_owned(),
            vec![BlockWindow {
                block_label: label.to_owned(),
                sub_block: None,
                start_ts: 0,
                end_ts: 24 * HOUR,
            }],
        );
        map
    }

    fn resolve_at(now_ts: i64, route: &str) -> VehicleDriverEntry {
        let windows = windows_for("100", "[01]/[04]");
        let assignments = assignments();
        let mut names = HashMap::new();
        names.insert("100".to_owned(), "Bus 100".to_owned());
        let mut routes = HashMap::new();
        routes.insert("100".to_owned(), route.to_owned());

        let inputs = ResolverInputs {
            block_windows: &windows,
            assignments: &assignments,
            vehicle_names: &names,
            vehicle_routes: &routes,
            ondemand_vehicles: &[],
            now_ts,
        };
        let mut cache = HashMap::new();
        let result = resolve_vehicle_drivers(&inputs, &mut cache);
        result.vehicle_drivers.get("100").cloned().unwrap()
    }

    #[test]
    fn selects_am_driver_on_allowed_block() {
        let entry = resolve_at(10 * HOUR + HOUR / 2, "Green Line");
        assert_eq!(entry.drivers.len(), 1);
        assert_eq!(entry.drivers[0].name, "D1");
        assert_eq!(entry.block, "[01]");
    }

    #[test]
    fn selects_pm_driver_after_handoff() {
        let entry = resolve_at(14 * HOUR + HOUR / 2, "Green Line");
        assert_eq!(entry.drivers.len(), 1);
        assert_eq!(entry.drivers[0].name, "D2");
    }

    #[test]
    fn route_switch_moves_selection_to_other_sub_block() {
        let entry = resolve_at(10 * HOUR + HOUR / 2, "Night Pilot");
        assert_eq!(entry.drivers.len(), 1);
        assert_eq!(entry.drivers[0].name, "D3");
        assert_eq!(entry.block, "[04]");
    }

    #[test]
    fn staged_vehicle_uses_active_shift_outside_trip_window() {
        // Window ended at 10:00, but the block 04 driver runs to 18:00.
        let mut windows = HashMap::new();
        windows.insert(
            "100".to_owned(),
            vec![BlockWindow {
                block_label: "[01]/[04]".to_owned(),
                sub_block: None,
                start_ts: 6 * HOUR,
                end_ts: 10 * HOUR,
            }],
        );
        let selected = select_blocks_for_vehicles(&windows, &assignments(), 16 * HOUR);
        assert_eq!(selected.get("100").map(String::as_str), Some("[01]/[04]"));
    }

    #[test]
    fn cached_selection_sticks_while_shift_runs() {
        let windows = windows_for("100", "[01]/[04]");
        let assignments = assignments();
        let names = HashMap::new();
        // No route at all: selection falls back to most recent start, which
        // at 07:00 is D1 on block 01.
        let routes = HashMap::new();
        let inputs = ResolverInputs {
            block_windows: &windows,
            assignments: &assignments,
            vehicle_names: &names,
            vehicle_routes: &routes,
            ondemand_vehicles: &[],
            now_ts: 7 * HOUR,
        };
        let mut cache = HashMap::new();
        resolve_vehicle_drivers(&inputs, &mut cache);
        let cached = cache.get("100").unwrap();
        assert_eq!(cached.block_number, "01");
        assert_eq!(cached.shift_end_ts, 12 * HOUR);
    }

    #[test]
    fn ondemand_vehicles_match_by_normalized_name() {
        let mut assignments = AssignmentsByBlock::new();
        let mut periods = HashMap::new();
        periods.insert(
            Period::Any,
            vec![shift("Pat  Doe", 6 * HOUR, 18 * HOUR, "OnDemand Driver 1")],
        );
        assignments.insert("OnDemand Driver".to_owned(), periods);

        let ondemand: Vec<OnDemandVehicle> = serde_json::from_str(
            r#"[{"VehicleID": 900, "driverName": "pat doe", "callName": "Van 9"}]"#,
        )
        .unwrap();

        let windows = HashMap::new();
        let names = HashMap::new();
        let routes = HashMap::new();
        let inputs = ResolverInputs {
            block_windows: &windows,
            assignments: &assignments,
            vehicle_names: &names,
            vehicle_routes: &routes,
            ondemand_vehicles: &ondemand,
            now_ts: 10 * HOUR,
        };
        let mut cache = HashMap::new();
        let result = resolve_vehicle_drivers(&inputs, &mut cache);

        let entry = result.vehicle_drivers.get("900").unwrap();
        assert_eq!(entry.block, "OnDemand Driver 1");
        assert_eq!(entry.vehicle_name.as_deref(), Some("Van 9"));
        // The standing position entry is present too.
        assert!(result.vehicle_drivers.contains_key("OnDemand Driver"));
    }

    #[test]
    fn handoff_overlap_returns_both_drivers_sorted() {
        let mut assignments = AssignmentsByBlock::new();
        let mut periods = HashMap::new();
        periods.insert(
            Period::Any,
            vec![
                shift("Late", 9 * HOUR, 17 * HOUR, "[02]"),
                shift("Early", 5 * HOUR, 10 * HOUR, "[02]"),
            ],
        );
        assignments.insert("02".to_owned(), periods);

        let drivers = find_current_drivers("02", &assignments, 9 * HOUR + HOUR / 2);
        assert_eq!(drivers.len(), 2);
        assert_eq!(drivers[0].name, "Early");
        assert_eq!(drivers[1].name, "Late");
    }
}
