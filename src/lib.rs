// Базовые модули
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod util; // src/util/mod.rs

// Try dispatch: пул, хэндлы, реестр, остановка
pub mod dispatch; // src/dispatch/{mod,handle,task,pool,registry,lifecycle}.rs

// Журнал активностей
pub mod serializer; // src/serializer/{mod,json,framed}.rs
pub mod snapshot;   // src/snapshot/{mod,file,rule,reader}.rs
pub mod logger;
pub mod lock;

// Цепочка перехвата и фасад
pub mod intercept;
pub mod coordinator;

// Удобные реэкспорты
pub use config::{CoordinatorBuilder, HulkConfig};
pub use context::{ActivityId, ActivityStatus, TransactionContext};
pub use coordinator::Coordinator;
pub use dispatch::{
    CancelToken, FutureRegistry, Invocation, Lifecycle, PoolStatus, TryDispatcher, TryHandle,
    TryStatus, TryTask,
};
pub use error::{ActionFailure, ActionStage, DispatchError, SnapshotError, TryError};
pub use intercept::{Call, Middleware, Next, Outcome, Pipeline, SnapshotLayer, TryDispatchLayer};
pub use logger::{ActivityLogger, LoggerStats};
pub use serializer::{FramedSerializer, JsonSerializer, Serializer};
pub use snapshot::{Quota, QuotaRule, SnapshotHeader, SnapshotLocation, SnapshotRule};
