//! 数据访问层
//! 所有 SQL 都集中在这里，服务层只组合仓库调用

pub mod analysis_repo;
pub mod gate_repo;
pub mod project_repo;
pub mod result_repo;
pub mod runner_repo;

pub use analysis_repo::AnalysisRepo;
pub use gate_repo::GateRepo;
pub use project_repo::ProjectRepo;
pub use result_repo::ResultRepo;
pub use runner_repo::RunnerRepo;
