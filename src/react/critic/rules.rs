//! 领域规则：纯函数，只读取参数，返回通过或（类别 + 原因）
//!
//! 阈值均为闭区间，比较时允许 1e-9 的浮点误差。缺失的参数跳过对应检查，非数值参数记为 geometric 失败。

use serde_json::{Map, Value};

use super::ConstraintCategory;

const EPS: f64 = 1e-9;

/// 规则违反
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub category: ConstraintCategory,
    pub reason: String,
}

impl Violation {
    fn new(category: ConstraintCategory, reason: impl Into<String>) -> Self {
        Self {
            category,
            reason: reason.into(),
        }
    }
}

pub type RuleResult = Result<(), Violation>;
pub type Rule = fn(&Map<String, Value>) -> RuleResult;

/// 按工具名查找规则
pub fn rule_for(tool: &str) -> Option<Rule> {
    let rule: Rule = match tool {
        "geometry.createWall" => check_wall,
        "geometry.createStair" => check_stair,
        "geometry.createDoor" | "door.place" => check_door,
        "geometry.createWindow" => check_window,
        "geometry.createColumn" => check_column,
        "geometry.createSlab" => check_slab,
        "geometry.createRoof" => check_roof,
        "geometry.createRoom" => check_room,
        "wall.cutOpening" => check_opening,
        "transform.move" => check_move,
        "transform.scale" => check_scale,
        _ => return None,
    };
    Some(rule)
}

/// 取第一个存在的键；存在但非数值时返回 geometric 违反
fn num(args: &Map<String, Value>, keys: &[&str]) -> Result<Option<f64>, Violation> {
    for key in keys {
        match args.get(*key) {
            None | Some(Value::Null) => continue,
            Some(value) => {
                return value.as_f64().map(Some).ok_or_else(|| {
                    Violation::new(
                        ConstraintCategory::Geometric,
                        format!("{key} must be a number, got {value}"),
                    )
                })
            }
        }
    }
    Ok(None)
}

fn at_least(
    value: f64,
    min: f64,
    category: ConstraintCategory,
    reason: impl FnOnce() -> String,
) -> RuleResult {
    if value < min - EPS {
        Err(Violation::new(category, reason()))
    } else {
        Ok(())
    }
}

fn at_most(
    value: f64,
    max: f64,
    category: ConstraintCategory,
    reason: impl FnOnce() -> String,
) -> RuleResult {
    if value > max + EPS {
        Err(Violation::new(category, reason()))
    } else {
        Ok(())
    }
}

fn positive(value: f64, name: &str) -> RuleResult {
    if value <= 0.0 {
        Err(Violation::new(
            ConstraintCategory::Geometric,
            format!("{name} must be positive, got {value}"),
        ))
    } else {
        Ok(())
    }
}

pub fn check_wall(args: &Map<String, Value>) -> RuleResult {
    use ConstraintCategory::*;
    if let Some(t) = num(args, &["thickness"])? {
        at_least(t, 0.10, Structural, || {
            format!("wall thickness {t}m is below the 0.10m structural minimum")
        })?;
    }
    if let Some(h) = num(args, &["height"])? {
        at_most(h, 4.5, BuildingCode, || {
            format!("wall height {h}m exceeds the 4.5m limit")
        })?;
    }
    if let Some(l) = num(args, &["length"])? {
        at_least(l, 0.30, Practical, || {
            format!("wall length {l}m is shorter than the 0.30m practical minimum")
        })?;
    }
    Ok(())
}

pub fn check_stair(args: &Map<String, Value>) -> RuleResult {
    use ConstraintCategory::*;
    let riser = num(args, &["riser", "riserHeight"])?;
    let tread = num(args, &["tread", "treadDepth"])?;
    if let Some(r) = riser {
        at_least(r, 0.15, BuildingCode, || format!("riser {r}m is below 0.15m"))?;
        at_most(r, 0.19, BuildingCode, || format!("riser {r}m exceeds 0.19m"))?;
    }
    if let Some(t) = tread {
        at_least(t, 0.25, BuildingCode, || format!("tread {t}m is below 0.25m"))?;
        at_most(t, 0.32, BuildingCode, || format!("tread {t}m exceeds 0.32m"))?;
    }
    if let (Some(r), Some(t)) = (riser, tread) {
        let stride = 2.0 * r + t;
        let reason = || format!("2 x riser + tread = {stride:.3}m is outside [0.60, 0.65]");
        at_least(stride, 0.60, Ergonomics, reason)?;
        at_most(stride, 0.65, Ergonomics, reason)?;
    }
    Ok(())
}

pub fn check_door(args: &Map<String, Value>) -> RuleResult {
    use ConstraintCategory::*;
    if let Some(w) = num(args, &["width"])? {
        at_least(w, 0.80, Accessibility, || {
            format!("door width {w}m is below the 0.80m accessible minimum")
        })?;
        at_most(w, 1.20, Practical, || format!("door width {w}m exceeds 1.20m"))?;
    }
    if let Some(h) = num(args, &["height"])? {
        at_least(h, 2.00, BuildingCode, || format!("door height {h}m is below 2.00m"))?;
        at_most(h, 2.40, BuildingCode, || format!("door height {h}m exceeds 2.40m"))?;
    }
    Ok(())
}

pub fn check_window(args: &Map<String, Value>) -> RuleResult {
    use ConstraintCategory::*;
    if let Some(w) = num(args, &["width"])? {
        at_least(w, 0.60, Safety, || {
            format!("window width {w}m is below the 0.60m egress minimum")
        })?;
    }
    if let Some(s) = num(args, &["sillHeight", "sill"])? {
        at_least(s, 0.80, Safety, || format!("sill height {s}m is below 0.80m"))?;
    }
    Ok(())
}

pub fn check_column(args: &Map<String, Value>) -> RuleResult {
    let height = num(args, &["height"])?;
    let diameter = num(args, &["diameter"])?;
    if let (Some(h), Some(d)) = (height, diameter) {
        positive(d, "column diameter")?;
        let slenderness = h / d;
        at_most(slenderness, 25.0, ConstraintCategory::Structural, || {
            format!("column slenderness {slenderness:.1} exceeds 25")
        })?;
    }
    Ok(())
}

pub fn check_slab(args: &Map<String, Value>) -> RuleResult {
    let thickness = num(args, &["thickness"])?;
    let span = num(args, &["span"])?;
    if let (Some(t), Some(s)) = (thickness, span) {
        let min = s / 30.0;
        at_least(t, min, ConstraintCategory::Structural, || {
            format!("slab thickness {t}m is below span/30 = {min:.3}m")
        })?;
    }
    Ok(())
}

pub fn check_roof(args: &Map<String, Value>) -> RuleResult {
    if let Some(p) = num(args, &["pitch"])? {
        at_least(p, 10.0, ConstraintCategory::Practical, || {
            format!("roof pitch {p} degrees is below 10 degrees")
        })?;
    }
    Ok(())
}

pub fn check_room(args: &Map<String, Value>) -> RuleResult {
    if let Some(w) = num(args, &["width"])? {
        positive(w, "room width")?;
    }
    if let Some(d) = num(args, &["depth"])? {
        positive(d, "room depth")?;
    }
    if let Some(h) = num(args, &["height"])? {
        at_least(h, 2.20, ConstraintCategory::BuildingCode, || {
            format!("room ceiling height {h}m is below 2.20m")
        })?;
    }
    Ok(())
}

pub fn check_opening(args: &Map<String, Value>) -> RuleResult {
    if let Some(w) = num(args, &["width"])? {
        positive(w, "opening width")?;
    }
    if let Some(h) = num(args, &["height"])? {
        positive(h, "opening height")?;
        at_most(h, 2.40, ConstraintCategory::Practical, || {
            format!("opening height {h}m exceeds 2.40m")
        })?;
    }
    Ok(())
}

/// 单次位移的上限（米）
pub const MAX_MOVE_OFFSET: f64 = 1000.0;

pub fn check_move(args: &Map<String, Value>) -> RuleResult {
    for key in ["dx", "dy", "dz"] {
        if let Some(v) = num(args, &[key])? {
            at_most(v.abs(), MAX_MOVE_OFFSET, ConstraintCategory::Practical, || {
                format!("{key} offset {v}m exceeds the {MAX_MOVE_OFFSET}m limit")
            })?;
        }
    }
    Ok(())
}

pub fn check_scale(args: &Map<String, Value>) -> RuleResult {
    use ConstraintCategory::*;
    if let Some(f) = num(args, &["factor"])? {
        at_least(f, 0.1, Geometric, || format!("scale factor {f} is below 0.1"))?;
        at_most(f, 10.0, Geometric, || format!("scale factor {f} exceeds 10.0"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn category(result: RuleResult) -> ConstraintCategory {
        result.unwrap_err().category
    }

    #[test]
    fn test_stair_riser_boundary() {
        assert!(check_stair(&args(json!({"riser": 0.19}))).is_ok());
        assert!(check_stair(&args(json!({"riser": 0.15}))).is_ok());
        assert_eq!(
            category(check_stair(&args(json!({"riser": 0.191})))),
            ConstraintCategory::BuildingCode
        );
        assert_eq!(
            category(check_stair(&args(json!({"tread": 0.33})))),
            ConstraintCategory::BuildingCode
        );
    }

    #[test]
    fn test_stair_comfort_formula() {
        // 2 * 0.17 + 0.28 = 0.62
        assert!(check_stair(&args(json!({"riser": 0.17, "tread": 0.28}))).is_ok());
        // 2 * 0.19 + 0.30 = 0.68
        assert_eq!(
            category(check_stair(&args(json!({"riser": 0.19, "tread": 0.30})))),
            ConstraintCategory::Ergonomics
        );
        // 2 * 0.15 + 0.25 = 0.55
        assert!(check_stair(&args(json!({"riserHeight": 0.15, "treadDepth": 0.25}))).is_err());
    }

    #[test]
    fn test_wall_boundaries() {
        assert!(check_wall(&args(json!({"thickness": 0.10}))).is_ok());
        assert_eq!(
            category(check_wall(&args(json!({"thickness": 0.099})))),
            ConstraintCategory::Structural
        );
        assert!(check_wall(&args(json!({"height": 4.5}))).is_ok());
        assert_eq!(
            category(check_wall(&args(json!({"height": 4.6})))),
            ConstraintCategory::BuildingCode
        );
        assert_eq!(
            category(check_wall(&args(json!({"length": 0.2})))),
            ConstraintCategory::Practical
        );
    }

    #[test]
    fn test_door_categories() {
        assert!(check_door(&args(json!({"width": 0.8, "height": 2.4}))).is_ok());
        assert_eq!(
            category(check_door(&args(json!({"width": 0.7})))),
            ConstraintCategory::Accessibility
        );
        assert_eq!(
            category(check_door(&args(json!({"width": 1.3})))),
            ConstraintCategory::Practical
        );
        assert_eq!(
            category(check_door(&args(json!({"height": 1.9})))),
            ConstraintCategory::BuildingCode
        );
    }

    #[test]
    fn test_window_column_slab_roof() {
        assert_eq!(
            category(check_window(&args(json!({"width": 0.5})))),
            ConstraintCategory::Safety
        );
        assert!(check_window(&args(json!({"width": 0.6, "sillHeight": 0.8}))).is_ok());

        assert!(check_column(&args(json!({"height": 5.0, "diameter": 0.2}))).is_ok());
        assert_eq!(
            category(check_column(&args(json!({"height": 5.0, "diameter": 0.1})))),
            ConstraintCategory::Structural
        );
        assert_eq!(
            category(check_column(&args(json!({"height": 3.0, "diameter": 0.0})))),
            ConstraintCategory::Geometric
        );

        assert!(check_slab(&args(json!({"thickness": 0.2, "span": 6.0}))).is_ok());
        assert!(check_slab(&args(json!({"thickness": 0.15, "span": 6.0}))).is_err());

        assert!(check_roof(&args(json!({"pitch": 10}))).is_ok());
        assert_eq!(
            category(check_roof(&args(json!({"pitch": 5})))),
            ConstraintCategory::Practical
        );
    }

    #[test]
    fn test_room_opening_move_scale() {
        assert!(check_room(&args(json!({"width": 4, "depth": 3, "height": 2.2}))).is_ok());
        assert_eq!(
            category(check_room(&args(json!({"height": 2.1})))),
            ConstraintCategory::BuildingCode
        );
        assert_eq!(
            category(check_room(&args(json!({"width": 0})))),
            ConstraintCategory::Geometric
        );
        assert!(check_opening(&args(json!({"width": 1.0, "height": 2.5}))).is_err());
        assert!(check_move(&args(json!({"dx": 1.0, "dz": -2}))).is_ok());
        assert!(check_move(&args(json!({"dy": -1000.0}))).is_ok());
        assert_eq!(
            category(check_move(&args(json!({"dx": 1000.5})))),
            ConstraintCategory::Practical
        );
        assert_eq!(
            category(check_move(&args(json!({"dz": "up"})))),
            ConstraintCategory::Geometric
        );
        assert!(check_scale(&args(json!({"factor": 10.0}))).is_ok());
        assert_eq!(
            category(check_scale(&args(json!({"factor": 0.05})))),
            ConstraintCategory::Geometric
        );
    }

    #[test]
    fn test_missing_and_non_numeric_args() {
        assert!(check_wall(&Map::new()).is_ok());
        let err = check_wall(&args(json!({"thickness": "thin"}))).unwrap_err();
        assert_eq!(err.category, ConstraintCategory::Geometric);
        assert!(err.reason.contains("thickness"));
    }

    #[test]
    fn test_rule_lookup() {
        assert!(rule_for("geometry.createWall").is_some());
        assert!(rule_for("door.place").is_some());
        assert!(rule_for("selection.clear").is_none());
    }
}
