//! 内存文档执行面（无头运行与测试用）
//!
//! 对象以 JSON 存储：`{id, kind, ...args}`。只做参数形状校验（如缺少 wallId 返回 E_BAD_ARGS），
//! 不做领域规则校验，后者由 Critic 负责。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{ExecutionSurface, SurfaceError, SurfaceResult};

/// 内存文档支持的操作；HTTP 执行面默认也暴露这一组
pub const STANDARD_OPERATIONS: &[&str] = &[
    "geometry.createWall",
    "geometry.createRoom",
    "geometry.createDoor",
    "geometry.createWindow",
    "geometry.createStair",
    "geometry.createColumn",
    "geometry.createSlab",
    "geometry.createRoof",
    "geometry.delete",
    "door.place",
    "wall.cutOpening",
    "transform.move",
    "transform.scale",
];

#[derive(Default)]
pub struct MemoryDocument {
    objects: Mutex<Vec<Value>>,
    next_id: AtomicU64,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前对象列表拷贝
    pub fn objects(&self) -> Vec<Value> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Value>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self, kind: &str) -> String {
        format!("{}_{}", kind, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn create(&self, kind: &str, args: &Map<String, Value>) -> SurfaceResult {
        let id = self.next_id(kind);
        let mut object = args.clone();
        object.insert("id".into(), json!(id));
        object.insert("kind".into(), json!(kind));
        self.lock().push(Value::Object(object));
        created(&id, kind)
    }

    fn delete(&self, args: &Map<String, Value>) -> SurfaceResult {
        let Some(id) = str_arg(args, "id") else {
            return bad_args("id required");
        };
        let mut objects = self.lock();
        let before = objects.len();
        objects.retain(|o| o.get("id").and_then(Value::as_str) != Some(id));
        if objects.len() == before {
            return not_found(id);
        }
        let mut fields = Map::new();
        fields.insert("deleted".into(), json!(id));
        SurfaceResult::success(fields)
    }

    fn place_door(&self, args: &Map<String, Value>) -> SurfaceResult {
        let Some(wall_id) = str_arg(args, "wallId") else {
            return bad_args("wallId required");
        };
        if !self.exists(wall_id) {
            return not_found(wall_id);
        }
        let mut door = args.clone();
        door.entry("width").or_insert(json!(0.9));
        self.create("door", &door)
    }

    fn cut_opening(&self, args: &Map<String, Value>) -> SurfaceResult {
        let Some(wall_id) = str_arg(args, "wallId") else {
            return bad_args("wallId required");
        };
        let width = num_arg(args, "width").unwrap_or(1.0);
        let height = num_arg(args, "height").unwrap_or(2.1);
        let mut objects = self.lock();
        let Some(wall) = find_mut(&mut objects, wall_id) else {
            return not_found(wall_id);
        };
        let openings = wall
            .as_object_mut()
            .map(|w| w.entry("openings").or_insert_with(|| json!([])));
        if let Some(Value::Array(list)) = openings {
            list.push(json!({"width": width, "height": height}));
        }
        let mut fields = Map::new();
        fields.insert("wallId".into(), json!(wall_id));
        SurfaceResult::success(fields)
    }

    fn transform(&self, op: &str, args: &Map<String, Value>) -> SurfaceResult {
        let Some(id) = str_arg(args, "id") else {
            return bad_args("id required");
        };
        let factor = num_arg(args, "factor");
        if op == "scale" && factor.is_none() {
            return bad_args("factor required");
        }
        let mut objects = self.lock();
        let Some(Value::Object(object)) = find_mut(&mut objects, id) else {
            return not_found(id);
        };
        if op == "move" {
            let mut position: Vec<f64> = object
                .get("position")
                .and_then(Value::as_array)
                .map(|p| p.iter().filter_map(Value::as_f64).collect())
                .unwrap_or_else(|| vec![0.0, 0.0, 0.0]);
            position.resize(3, 0.0);
            for (axis, key) in ["dx", "dy", "dz"].iter().enumerate() {
                position[axis] += num_arg(args, key).unwrap_or(0.0);
            }
            object.insert("position".into(), json!(position));
        } else {
            let scale = object.get("scale").and_then(Value::as_f64).unwrap_or(1.0);
            object.insert("scale".into(), json!(scale * factor.unwrap_or(1.0)));
        }
        let mut fields = Map::new();
        fields.insert("id".into(), json!(id));
        SurfaceResult::success(fields)
    }

    fn exists(&self, id: &str) -> bool {
        self.lock()
            .iter()
            .any(|o| o.get("id").and_then(Value::as_str) == Some(id))
    }
}

#[async_trait]
impl ExecutionSurface for MemoryDocument {
    fn operations(&self) -> Vec<String> {
        STANDARD_OPERATIONS.iter().map(|s| s.to_string()).collect()
    }

    async fn invoke(&self, name: &str, args: Value) -> SurfaceResult {
        let empty = Map::new();
        let args = match &args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return bad_args("args must be an object"),
        };
        match name {
            "geometry.delete" => self.delete(args),
            "door.place" => self.place_door(args),
            "wall.cutOpening" => self.cut_opening(args),
            "transform.move" => self.transform("move", args),
            "transform.scale" => self.transform("scale", args),
            other => match other.strip_prefix("geometry.create") {
                Some(kind) if STANDARD_OPERATIONS.contains(&other) => self.create(&kind.to_lowercase(), args),
                _ => SurfaceResult::failure(
                    "E_UNKNOWN_TOOL",
                    format!("unknown operation {other}"),
                    None,
                ),
            },
        }
    }

    async fn list_objects(&self) -> Result<Vec<Value>, SurfaceError> {
        Ok(self.objects())
    }

    async fn restore_objects(&self, objects: Vec<Value>) -> Result<(), SurfaceError> {
        *self.lock() = objects;
        Ok(())
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn num_arg(args: &Map<String, Value>, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

fn find_mut<'a>(objects: &'a mut [Value], id: &str) -> Option<&'a mut Value> {
    objects
        .iter_mut()
        .find(|o| o.get("id").and_then(Value::as_str) == Some(id))
}

fn created(id: &str, kind: &str) -> SurfaceResult {
    let mut fields = Map::new();
    fields.insert("id".into(), json!(id));
    fields.insert("kind".into(), json!(kind));
    SurfaceResult::success(fields)
}

fn bad_args(title: &str) -> SurfaceResult {
    SurfaceResult::failure("E_BAD_ARGS", title, None)
}

fn not_found(id: &str) -> SurfaceResult {
    SurfaceResult::failure("E_NOT_FOUND", format!("object {id} not found"), None)
}
