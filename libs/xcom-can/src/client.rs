//! Xcom-CAN public client
//!
//! One call per service on top of [`XcomNode::wait_response`].
//!
//! Changing parameters while the inverters run restarts the algorithm they
//! belong to. Flash endurance is about 1000 writes per parameter: cyclic
//! writes should use [`ParameterPart::Ram`].

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::addresses::Address;
use crate::codec::{ParameterPart, Request, Response};
use crate::config::XcomConfig;
use crate::error::{Result, XcomError};
use crate::node::XcomNode;
use crate::notifications::NotificationRecord;
use crate::transport::CanDriver;

/// Client bound to a running node
///
/// The receive loop runs from [`XcomClient::open`] until
/// [`XcomClient::close`]; dropping the client cancels it as well.
#[derive(Debug)]
pub struct XcomClient {
    node: Arc<XcomNode>,
    default_timeout: Duration,
}

impl XcomClient {
    /// Build a node on `driver` with every public service and start it
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(driver: Arc<dyn CanDriver>, config: &XcomConfig) -> Result<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(XcomError::config("XcomClient::open requires a tokio runtime"));
        }

        let node = Arc::new(
            XcomNode::new(driver, config.address)
                .with_rx_poll_interval(config.rx_poll_interval()),
        );
        node.start();
        info!(
            "Xcom-CAN client {} opened on {} ({} bit/s)",
            config.address, config.interface, config.bitrate
        );

        Ok(Self {
            node,
            default_timeout: config.default_timeout(),
        })
    }

    /// Stop the receive loop and wait for it to finish
    pub async fn close(self) {
        self.node.stop().await;
    }

    pub fn node(&self) -> &Arc<XcomNode> {
        &self.node
    }

    fn timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.default_timeout)
    }

    /// Read a user info value (measurement, state) from a device
    pub async fn read_user_info(
        &self,
        destination: Address,
        info_id: u16,
        timeout: Option<Duration>,
    ) -> Result<f32> {
        let request = Request::read_user_info(info_id);
        match self
            .node
            .wait_response(destination, request, self.timeout(timeout))
            .await?
        {
            Response::UserInfoRead(response) => Ok(response.value),
            other => Err(unexpected(&request, &other)),
        }
    }

    /// Read a parameter value, or its allowed minimum / maximum
    ///
    /// Devices do not expose RAM reads: [`ParameterPart::Ram`] returns the
    /// flash value.
    pub async fn read_parameter(
        &self,
        destination: Address,
        parameter_id: u16,
        part: ParameterPart,
        timeout: Option<Duration>,
    ) -> Result<f32> {
        let request = Request::read_parameter(parameter_id, part);
        match self
            .node
            .wait_response(destination, request, self.timeout(timeout))
            .await?
        {
            Response::ParameterRead(response) => Ok(response.value),
            other => Err(unexpected(&request, &other)),
        }
    }

    /// Write a parameter; returns the parameter id the device acknowledged
    pub async fn write_parameter(
        &self,
        destination: Address,
        parameter_id: u16,
        part: ParameterPart,
        value: f32,
        timeout: Option<Duration>,
    ) -> Result<u16> {
        let request = Request::write_parameter(parameter_id, part, value);
        match self
            .node
            .wait_response(destination, request, self.timeout(timeout))
            .await?
        {
            Response::ParameterWrite(response) => Ok(response.parameter_id),
            other => Err(unexpected(&request, &other)),
        }
    }

    /// Notifications received since the client was opened
    pub fn messages(&self) -> Vec<NotificationRecord> {
        self.node.notifications()
    }
}

impl Drop for XcomClient {
    fn drop(&mut self) {
        self.node.cancel();
    }
}

fn unexpected(request: &Request, response: &Response) -> XcomError {
    XcomError::UnexpectedResponse(format!(
        "{} request answered by {} response",
        request.kind(),
        response.kind()
    ))
}
