//! # steersim
//!
//! 自律エージェントの操舵シミュレーションライブラリ。
//!
//! 各ビークルは群れ行動・追跡/逃走・経路追従・障害物回避などの操舵行動を
//! 重み付きで合成し、速度・力の上限のもとで運動を積分します。

pub mod logging;
pub mod models;
pub mod scenario;
pub mod simulation;
