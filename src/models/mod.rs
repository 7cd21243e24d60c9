// 基本的なデータ型と数学ユーティリティ
pub mod common;
pub mod local_space;

// エージェントの基本インターフェース（trait）定義
pub mod traits;

// ビークルと検知対象
pub mod vehicle;
pub mod detectable;

// 空間インデックス・ティックキュー・レーダー
pub mod spatial_index;
pub mod tick_queue;
pub mod radar;
pub mod neighborhood;

// 経路
pub mod pathway;

// 各操舵行動の実装
pub mod flocking;
pub mod pursuit;
pub mod path_following;
pub mod obstacle_avoidance;
pub mod behaviors;
pub mod steering;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use local_space::LocalSpace;
pub use vehicle::{AccelerationSmoothing, IntegrationReport, Vehicle, VehicleState};
pub use detectable::{DetectableObject, SphericalObstacle};
pub use spatial_index::SpatialIndex;
pub use tick_queue::{QueueStats, TickQueues, TickedQueue};
pub use radar::{Radar, RadarState, RadarSweep};
pub use neighborhood::NeighborhoodConfig;
pub use pathway::{PathRelativePosition, Pathway, PathwayError, PathwayKind, PolylinePathway, SplinePathway};
pub use pursuit::{Evasion, Intercept, Pursuit};
pub use path_following::{FollowDirection, PathFollower, PredictivePathFollower};
pub use obstacle_avoidance::{ObstacleAvoidance, ObstacleRepulsion, PathIntersection};
pub use behaviors::{Follow, MinimumSpeed, NeighborAvoidance, Seek, SpeedNoise, TargetSpeed, Tether, Wander};
pub use steering::{Steering, SteeringBehavior, SteeringContext, SteeringSet};
