//! # Lazy Computation Cells
//!
//! 单次赋值的惰性计算单元，工厂最多执行一次。
//!
//! - [`LazyValue`]: 同步工厂，并发调用者阻塞等待正在进行的计算
//! - [`LazyTask`]: 异步工厂，产生的 future 被共享，所有等待者轮询同一个计算，
//!   单个等待者被丢弃不会取消其他人的计算
//!
//! 两种单元都会记住失败 (包括工厂 panic)：同一次计算的所有调用者，
//! 包括后来者，都收到同一个 [`FactoryError`]。

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::FactoryError;

type ValueFactory<V> = Box<dyn FnOnce() -> anyhow::Result<V> + Send>;
type TaskFactory<V> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<V>> + Send>;

/// 交给 [`LazyTask`] 每个等待者的共享 future
pub type SharedTask<V> = Shared<BoxFuture<'static, Result<V, FactoryError>>>;

fn abandoned() -> FactoryError {
    Arc::new(anyhow::anyhow!(
        "value factory panicked before producing a result"
    ))
}

/// 将 panic 负载转换为工厂错误
fn panicked(payload: Box<dyn Any + Send>) -> FactoryError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    Arc::new(anyhow::anyhow!("value factory panicked: {}", message))
}

/// 同步工厂支撑的惰性值
pub struct LazyValue<V> {
    cell: OnceLock<Result<V, FactoryError>>,
    factory: Mutex<Option<ValueFactory<V>>>,
}

impl<V: Clone> LazyValue<V> {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<V> + Send + 'static,
    {
        Self {
            cell: OnceLock::new(),
            factory: Mutex::new(Some(Box::new(factory))),
        }
    }

    /// 物化值；若尚无人执行过工厂则在当前线程执行。
    pub fn force(&self) -> Result<V, FactoryError> {
        self.cell
            .get_or_init(|| {
                let factory = self.factory.lock().take();
                match factory {
                    Some(factory) => match panic::catch_unwind(AssertUnwindSafe(factory)) {
                        Ok(result) => result.map_err(Arc::new),
                        Err(payload) => Err(panicked(payload)),
                    },
                    None => Err(abandoned()),
                }
            })
            .clone()
    }

    pub fn is_materialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// 异步工厂支撑的惰性值
pub struct LazyTask<V> {
    task: OnceLock<SharedTask<V>>,
    factory: Mutex<Option<TaskFactory<V>>>,
}

impl<V> LazyTask<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        Self {
            task: OnceLock::new(),
            factory: Mutex::new(Some(Box::new(move || factory().boxed()))),
        }
    }

    /// 首次调用时启动计算，返回指向该计算的句柄。
    ///
    /// 返回的 future 自带所需的一切，调用者可在释放对单元的借用后再 await。
    /// 工厂本身或其 future 发生 panic 时，结果为 [`FactoryError`]。
    pub fn force(&self) -> SharedTask<V> {
        self.task
            .get_or_init(|| {
                let factory = self.factory.lock().take();
                let task: BoxFuture<'static, Result<V, FactoryError>> = match factory {
                    Some(factory) => match panic::catch_unwind(AssertUnwindSafe(factory)) {
                        Ok(pending) => AssertUnwindSafe(pending)
                            .catch_unwind()
                            .map(|outcome| match outcome {
                                Ok(result) => result.map_err(Arc::new),
                                Err(payload) => Err(panicked(payload)),
                            })
                            .boxed(),
                        Err(payload) => future::ready(Err(panicked(payload))).boxed(),
                    },
                    None => future::ready(Err(abandoned())).boxed(),
                };
                task.shared()
            })
            .clone()
    }

    /// 共享计算已产出结果时返回 true
    pub fn is_materialized(&self) -> bool {
        self.task
            .get()
            .map_or(false, |task| task.peek().is_some())
    }
}
