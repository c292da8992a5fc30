//! Builder 模式实现
//!
//! 提供链式构造 `Botlink` 实例的便捷方式。

use crate::botlink::Botlink;
use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use botlink_link::LinkAdapter;

/// 默认串口波特率
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Botlink Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use botlink_driver::{BotlinkBuilder, PipelineConfig};
///
/// // 自动选择第一个串口
/// let botlink = BotlinkBuilder::new().build().unwrap();
///
/// // 指定端口和 Pipeline 配置
/// let botlink = BotlinkBuilder::new()
///     .port("/dev/ttyUSB0")
///     .baud_rate(230_400)
///     .pipeline_config(PipelineConfig::default())
///     .build()
///     .unwrap();
/// ```
pub struct BotlinkBuilder {
    /// 串口名称（None 时取第一个可用串口）
    port: Option<String>,
    baud_rate: Option<u32>,
    pipeline_config: Option<PipelineConfig>,
    /// 自定义链路（设置后忽略 `port`/`baud_rate`）
    adapter: Option<Box<dyn LinkAdapter + Send>>,
}

impl BotlinkBuilder {
    pub fn new() -> Self {
        Self {
            port: None,
            baud_rate: None,
            pipeline_config: None,
            adapter: None,
        }
    }

    /// 设置串口（可选，默认自动检测）
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// 设置波特率（可选，默认 115200）
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// 设置 Pipeline 配置（可选）
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = Some(config);
        self
    }

    /// 使用自定义链路适配器（仿真总线、测试替身等）
    ///
    /// # Example
    ///
    /// ```
    /// use botlink_driver::BotlinkBuilder;
    /// use botlink_link::SimBus;
    ///
    /// let (host, _device) = SimBus::pair();
    /// let botlink = BotlinkBuilder::new().adapter(Box::new(host)).build().unwrap();
    /// assert_eq!(botlink.port(), "custom");
    /// ```
    pub fn adapter(mut self, adapter: Box<dyn LinkAdapter + Send>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// 构建 Botlink 实例并启动后台 IO 线程
    ///
    /// # Errors
    /// - `DriverError::Link`: 串口打开失败
    /// - `DriverError::InvalidInput`: 没有可用串口，或未启用 `serial` feature 且未提供适配器
    pub fn build(self) -> Result<Botlink, DriverError> {
        let baud_rate = self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
        if let Some(adapter) = self.adapter {
            return Ok(Botlink::new(adapter, self.pipeline_config)
                .with_metadata("custom".to_string(), baud_rate));
        }
        self.build_serial(baud_rate)
    }

    #[cfg(feature = "serial")]
    fn build_serial(self, baud_rate: u32) -> Result<Botlink, DriverError> {
        use botlink_link::{SerialLinkAdapter, list_ports};

        let port = match self.port {
            Some(port) => port,
            None => list_ports()?.into_iter().next().ok_or_else(|| {
                DriverError::InvalidInput("no serial port found".to_string())
            })?,
        };
        let adapter = SerialLinkAdapter::open(&port, baud_rate)?;
        Ok(Botlink::new(adapter, self.pipeline_config).with_metadata(port, baud_rate))
    }

    #[cfg(not(feature = "serial"))]
    fn build_serial(self, _baud_rate: u32) -> Result<Botlink, DriverError> {
        Err(DriverError::InvalidInput(
            "serial support disabled; provide an adapter".to_string(),
        ))
    }
}

impl Default for BotlinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}
