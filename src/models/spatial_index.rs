use std::collections::{BTreeMap, HashMap};

use glam::DVec3;
use tracing::trace;

use crate::models::{
    common::DetectableId,
    detectable::DetectableObject,
    traits::IDetectable,
};

/// 既定のグリッドセルサイズ（メートル）
pub const DEFAULT_CELL_SIZE: f64 = 10.0;

type CellKey = (i64, i64, i64);

/// 検知可能オブジェクトの空間インデックス
///
/// シミュレーションエンジンが所有する明示的なインスタンスです。
/// 一様ハッシュグリッドで球クエリを高速化し、結果はIDの昇順で返します。
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    objects: BTreeMap<DetectableId, DetectableObject>,
    cells: HashMap<CellKey, Vec<DetectableId>>,
    object_cells: HashMap<DetectableId, CellKey>,
    max_radius: f64,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl SpatialIndex {
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            objects: BTreeMap::new(),
            cells: HashMap::new(),
            object_cells: HashMap::new(),
            max_radius: 0.0,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn cell_of(&self, position: DVec3) -> CellKey {
        let scaled = position / self.cell_size;
        (
            scaled.x.floor() as i64,
            scaled.y.floor() as i64,
            scaled.z.floor() as i64,
        )
    }

    /// オブジェクトを登録（同じIDが既にあれば置き換え）
    pub fn register(&mut self, object: DetectableObject) {
        let id = object.id;
        if self.objects.contains_key(&id) {
            self.remove_from_cell(id);
        }
        let cell = self.cell_of(object.position);
        self.cells.entry(cell).or_default().push(id);
        self.object_cells.insert(id, cell);
        self.max_radius = self.max_radius.max(object.radius());
        self.objects.insert(id, object);
        trace!("空間インデックスに登録: {}", id);
    }

    /// オブジェクトの登録解除
    ///
    /// # 戻り値
    ///
    /// 登録されていた場合はそのオブジェクト
    pub fn deregister(&mut self, id: DetectableId) -> Option<DetectableObject> {
        let removed = self.objects.remove(&id)?;
        self.remove_from_cell(id);
        if removed.radius() >= self.max_radius {
            self.max_radius = self.objects.values().map(|o| o.radius()).fold(0.0, f64::max);
        }
        trace!("空間インデックスから登録解除: {}", id);
        Some(removed)
    }

    fn remove_from_cell(&mut self, id: DetectableId) {
        if let Some(cell) = self.object_cells.remove(&id) {
            if let Some(ids) = self.cells.get_mut(&cell) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
    }

    /// 登録済みオブジェクトの内容を更新（未登録なら何もしない）
    pub fn update<F>(&mut self, id: DetectableId, apply: F) -> bool
    where
        F: FnOnce(&mut DetectableObject),
    {
        let Some(object) = self.objects.get_mut(&id) else {
            return false;
        };
        apply(object);
        let (position, radius) = (object.position, object.radius());
        let new_cell = self.cell_of(position);
        self.max_radius = self.max_radius.max(radius);

        if self.object_cells.get(&id) != Some(&new_cell) {
            self.remove_from_cell(id);
            self.cells.entry(new_cell).or_default().push(id);
            self.object_cells.insert(id, new_cell);
        }
        true
    }

    /// 有効フラグの設定
    pub fn set_enabled(&mut self, id: DetectableId, enabled: bool) -> bool {
        self.update(id, |object| object.enabled = enabled)
    }

    pub fn get(&self, id: DetectableId) -> Option<&DetectableObject> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: DetectableId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectableObject> {
        self.objects.values()
    }

    /// 球と重なるオブジェクトのIDを取得
    ///
    /// 中心間距離が`radius + オブジェクト半径`以下のものを重なりとみなします。
    ///
    /// # 引数
    ///
    /// * `center` - 球の中心
    /// * `radius` - 球の半径
    ///
    /// # 戻り値
    ///
    /// ID昇順に並んだオブジェクトIDのベクター
    pub fn overlap_sphere(&self, center: DVec3, radius: f64) -> Vec<DetectableId> {
        if !(radius >= 0.0) || !center.is_finite() {
            return Vec::new();
        }
        let reach = radius + self.max_radius;
        let min_cell = self.cell_of(center - DVec3::splat(reach));
        let max_cell = self.cell_of(center + DVec3::splat(reach));

        let cell_span = (max_cell.0 - min_cell.0 + 1) as u128
            * (max_cell.1 - min_cell.1 + 1) as u128
            * (max_cell.2 - min_cell.2 + 1) as u128;

        let overlaps = |object: &DetectableObject| {
            let limit = radius + object.radius();
            object.position.distance_squared(center) <= limit * limit
        };

        let mut result: Vec<DetectableId> = if cell_span > self.cells.len() as u128 {
            // 探索範囲がセル数より広い場合は全件走査
            self.objects.values().filter(|o| overlaps(*o)).map(|o| o.id).collect()
        } else {
            let mut found = Vec::new();
            for x in min_cell.0..=max_cell.0 {
                for y in min_cell.1..=max_cell.1 {
                    for z in min_cell.2..=max_cell.2 {
                        let Some(ids) = self.cells.get(&(x, y, z)) else {
                            continue;
                        };
                        for id in ids {
                            if let Some(object) = self.objects.get(id) {
                                if overlaps(object) {
                                    found.push(*id);
                                }
                            }
                        }
                    }
                }
            }
            found
        };

        result.sort_unstable();
        result.dedup();
        result
    }
}
