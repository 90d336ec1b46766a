//! The transaction state machine.
//!
//! The machine is pure: it consumes frame/message/timer events and yields
//! actions; the driver task performs the I/O and owns the timers. This
//! keeps every transition testable without a transport or a clock.

use std::time::Duration;

use zwave_serial::message::payloads::TransmitStatus;
use zwave_serial::{Message, MessagePayload};

use crate::error::TransactionFailure;
use crate::transaction::{MessageMatcher, TransactionStage};

/// Timers the machine may ask the driver to arm. At most one per kind is
/// active; arming replaces, and any transition away clears the stage's
/// timer implicitly (the driver clears all transaction timers whenever it
/// processes machine actions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Ack,
    Response,
    Callback,
}

/// Inputs to the machine.
#[derive(Debug)]
pub enum TxEvent<'a> {
    Ack,
    Nak,
    Can,
    /// An inbound message the driver already verified via
    /// [`TransactionMachine::wants`].
    Message(&'a Message),
    Timer(TimerKind),
}

/// Outputs of the machine, executed by the driver in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAction {
    /// Write the transaction's frame to the transport.
    Transmit,
    StartTimer(TimerKind, Duration),
    /// Wait out a backoff, then call [`TransactionMachine::start`] again.
    RetryAfter(Duration),
    /// Move the transaction back into its node's wake-up pending set.
    Park,
    Complete(Option<Message>),
    Fail(TransactionFailure),
}

/// Static parameters of one transaction run.
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub ack_timeout: Duration,
    pub response_timeout: Duration,
    pub callback_timeout: Duration,
    pub max_attempts: u8,
    /// Whether the message is a SendData variant whose callback carries a
    /// TransmitStatus.
    pub send_data: bool,
    /// Whether the addressed node is always-on. Only meaningful for
    /// SendData.
    pub target_listening: bool,
}

/// Base backoff before retry attempt `attempt` (1-based): 100 ms × attempt².
/// The driver adds jitter on top.
pub fn backoff_duration(attempt: u8) -> Duration {
    Duration::from_millis(100 * (attempt as u64).pow(2))
}

#[derive(Debug)]
pub struct TransactionMachine {
    stage: TransactionStage,
    config: MachineConfig,
    expected_response: Option<MessageMatcher>,
    expected_callback: Option<MessageMatcher>,
    attempts_used: u8,
    no_ack_retried: bool,
}

impl TransactionMachine {
    pub fn new(
        expected_response: Option<MessageMatcher>,
        expected_callback: Option<MessageMatcher>,
        config: MachineConfig,
    ) -> Self {
        Self {
            stage: TransactionStage::Created,
            config,
            expected_response,
            expected_callback,
            attempts_used: 0,
            no_ack_retried: false,
        }
    }

    pub fn stage(&self) -> TransactionStage {
        self.stage
    }

    pub fn attempts_used(&self) -> u8 {
        self.attempts_used
    }

    /// Begin (or re-begin after a retry backoff) a transmission attempt.
    pub fn start(&mut self) -> Vec<TxAction> {
        self.attempts_used += 1;
        self.stage = TransactionStage::WaitingForAck;
        vec![
            TxAction::Transmit,
            TxAction::StartTimer(TimerKind::Ack, self.config.ack_timeout),
        ]
    }

    /// Whether this inbound message belongs to the transaction in its
    /// current stage.
    pub fn wants(&self, msg: &Message) -> bool {
        match self.stage {
            TransactionStage::WaitingForResponse => self
                .expected_response
                .as_ref()
                .is_some_and(|m| m.matches(msg)),
            TransactionStage::WaitingForCallback => self
                .expected_callback
                .as_ref()
                .is_some_and(|m| m.matches(msg)),
            _ => false,
        }
    }

    pub fn handle(&mut self, event: TxEvent<'_>) -> Vec<TxAction> {
        match self.stage {
            TransactionStage::WaitingForAck => match event {
                TxEvent::Ack => self.after_ack(),
                TxEvent::Nak | TxEvent::Can => self.retry_or_fail(TransactionFailure::CanNak),
                TxEvent::Timer(TimerKind::Ack) => {
                    self.retry_or_fail(TransactionFailure::AckTimeout)
                }
                _ => Vec::new(),
            },
            TransactionStage::WaitingForResponse => match event {
                TxEvent::Message(msg) => self.on_response(msg),
                // CAN while awaiting the response is treated like a NAK of
                // the preceding frame.
                TxEvent::Can => self.retry_or_fail(TransactionFailure::CanNak),
                TxEvent::Timer(TimerKind::Response) => {
                    self.fail(TransactionFailure::ResponseTimeout)
                }
                _ => Vec::new(),
            },
            TransactionStage::WaitingForCallback => match event {
                TxEvent::Message(msg) => self.on_callback(msg),
                TxEvent::Timer(TimerKind::Callback) => {
                    self.fail(TransactionFailure::CallbackTimeout)
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn after_ack(&mut self) -> Vec<TxAction> {
        if self.expected_response.is_some() {
            self.stage = TransactionStage::WaitingForResponse;
            vec![TxAction::StartTimer(
                TimerKind::Response,
                self.config.response_timeout,
            )]
        } else if self.expected_callback.is_some() {
            self.stage = TransactionStage::WaitingForCallback;
            vec![TxAction::StartTimer(
                TimerKind::Callback,
                self.config.callback_timeout,
            )]
        } else {
            self.stage = TransactionStage::Completed;
            vec![TxAction::Complete(None)]
        }
    }

    fn on_response(&mut self, msg: &Message) -> Vec<TxAction> {
        // A rejected SendData never reaches the radio; retry it.
        if self.config.send_data {
            if let MessagePayload::SendDataResponse { accepted: false } = msg.payload {
                return self.retry_or_fail(TransactionFailure::ControllerFailure);
            }
        }
        if self.expected_callback.is_some() {
            self.stage = TransactionStage::WaitingForCallback;
            vec![TxAction::StartTimer(
                TimerKind::Callback,
                self.config.callback_timeout,
            )]
        } else {
            self.stage = TransactionStage::Completed;
            vec![TxAction::Complete(Some(msg.clone()))]
        }
    }

    fn on_callback(&mut self, msg: &Message) -> Vec<TxAction> {
        if !self.config.send_data {
            self.stage = TransactionStage::Completed;
            return vec![TxAction::Complete(Some(msg.clone()))];
        }
        let status = match &msg.payload {
            MessagePayload::SendDataCallback(cb) => cb.tx_status,
            _ => {
                self.stage = TransactionStage::Completed;
                return vec![TxAction::Complete(Some(msg.clone()))];
            }
        };
        match status {
            TransmitStatus::Ok => {
                self.stage = TransactionStage::Completed;
                vec![TxAction::Complete(Some(msg.clone()))]
            }
            TransmitStatus::NoAck => {
                if !self.config.target_listening {
                    // Sleeping target: hold until the node wakes up.
                    self.stage = TransactionStage::Created;
                    vec![TxAction::Park]
                } else if !self.no_ack_retried {
                    self.no_ack_retried = true;
                    self.stage = TransactionStage::Created;
                    vec![TxAction::RetryAfter(backoff_duration(self.attempts_used))]
                } else {
                    self.fail(TransactionFailure::NodeTimeout)
                }
            }
            TransmitStatus::Fail | TransmitStatus::NotIdle | TransmitStatus::NoRoute => {
                self.fail(TransactionFailure::ControllerFailure)
            }
            TransmitStatus::Other(_) => self.fail(TransactionFailure::ControllerFailure),
        }
    }

    fn retry_or_fail(&mut self, failure: TransactionFailure) -> Vec<TxAction> {
        if self.attempts_used < self.config.max_attempts {
            self.stage = TransactionStage::Created;
            vec![TxAction::RetryAfter(backoff_duration(self.attempts_used))]
        } else {
            self.fail(failure)
        }
    }

    fn fail(&mut self, failure: TransactionFailure) -> Vec<TxAction> {
        self.stage = TransactionStage::Failed;
        vec![TxAction::Fail(failure)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zwave_serial::message::payloads::SendDataCallback;
    use zwave_serial::{FunctionType, MessageType};

    fn config() -> MachineConfig {
        MachineConfig {
            ack_timeout: Duration::from_millis(1600),
            response_timeout: Duration::from_secs(10),
            callback_timeout: Duration::from_secs(65),
            max_attempts: 3,
            send_data: false,
            target_listening: true,
        }
    }

    fn version_response() -> Message {
        Message::new(
            MessageType::Response,
            FunctionType::GetControllerVersion,
            MessagePayload::GetControllerVersionResponse(
                zwave_serial::message::ControllerVersion {
                    version: "Z-Wave 4.05".into(),
                    library_type: 1,
                },
            ),
        )
    }

    fn send_data_callback(status: TransmitStatus) -> Message {
        Message::request(
            FunctionType::SendData,
            MessagePayload::SendDataCallback(SendDataCallback {
                callback_id: 0x21,
                tx_status: status,
            }),
        )
    }

    fn send_data_machine(target_listening: bool) -> TransactionMachine {
        TransactionMachine::new(
            Some(MessageMatcher::ResponseFor(FunctionType::SendData)),
            Some(MessageMatcher::CallbackFor {
                function: FunctionType::SendData,
                callback_id: 0x21,
            }),
            MachineConfig {
                send_data: true,
                target_listening,
                ..config()
            },
        )
    }

    fn send_data_response(accepted: bool) -> Message {
        Message::new(
            MessageType::Response,
            FunctionType::SendData,
            MessagePayload::SendDataResponse { accepted },
        )
    }

    #[test]
    fn start_transmits_and_arms_ack_timer() {
        let mut machine = TransactionMachine::new(None, None, config());
        let actions = machine.start();
        assert_eq!(actions[0], TxAction::Transmit);
        assert_eq!(
            actions[1],
            TxAction::StartTimer(TimerKind::Ack, Duration::from_millis(1600))
        );
        assert_eq!(machine.stage(), TransactionStage::WaitingForAck);
    }

    #[test]
    fn ack_without_expectations_completes() {
        let mut machine = TransactionMachine::new(None, None, config());
        machine.start();
        let actions = machine.handle(TxEvent::Ack);
        assert_eq!(actions, vec![TxAction::Complete(None)]);
        assert_eq!(machine.stage(), TransactionStage::Completed);
    }

    #[test]
    fn nak_then_success_uses_two_attempts() {
        // Spec scenario: NAK on the first attempt, ACK + Response on the
        // second; the transaction resolves with attempt count 2.
        let mut machine = TransactionMachine::new(
            Some(MessageMatcher::ResponseFor(FunctionType::GetControllerVersion)),
            None,
            config(),
        );
        machine.start();
        let actions = machine.handle(TxEvent::Nak);
        assert_eq!(
            actions,
            vec![TxAction::RetryAfter(Duration::from_millis(100))]
        );

        machine.start();
        machine.handle(TxEvent::Ack);
        assert_eq!(machine.stage(), TransactionStage::WaitingForResponse);

        let response = version_response();
        assert!(machine.wants(&response));
        let actions = machine.handle(TxEvent::Message(&response));
        assert_eq!(actions, vec![TxAction::Complete(Some(response))]);
        assert_eq!(machine.attempts_used(), 2);
    }

    #[test]
    fn ack_timeout_exhausts_attempts() {
        let mut machine = TransactionMachine::new(None, None, config());
        machine.start();
        assert_eq!(
            machine.handle(TxEvent::Timer(TimerKind::Ack)),
            vec![TxAction::RetryAfter(Duration::from_millis(100))]
        );
        machine.start();
        assert_eq!(
            machine.handle(TxEvent::Timer(TimerKind::Ack)),
            vec![TxAction::RetryAfter(Duration::from_millis(400))]
        );
        machine.start();
        assert_eq!(
            machine.handle(TxEvent::Timer(TimerKind::Ack)),
            vec![TxAction::Fail(TransactionFailure::AckTimeout)]
        );
        assert_eq!(machine.stage(), TransactionStage::Failed);
    }

    #[test]
    fn can_exhausts_to_cannak() {
        let mut machine = TransactionMachine::new(None, None, MachineConfig {
            max_attempts: 1,
            ..config()
        });
        machine.start();
        assert_eq!(
            machine.handle(TxEvent::Can),
            vec![TxAction::Fail(TransactionFailure::CanNak)]
        );
    }

    #[test]
    fn response_timeout_fails_without_retry() {
        let mut machine = TransactionMachine::new(
            Some(MessageMatcher::ResponseFor(FunctionType::GetControllerVersion)),
            None,
            config(),
        );
        machine.start();
        machine.handle(TxEvent::Ack);
        assert_eq!(
            machine.handle(TxEvent::Timer(TimerKind::Response)),
            vec![TxAction::Fail(TransactionFailure::ResponseTimeout)]
        );
    }

    #[test]
    fn can_during_response_wait_retries() {
        let mut machine = TransactionMachine::new(
            Some(MessageMatcher::ResponseFor(FunctionType::GetControllerVersion)),
            None,
            config(),
        );
        machine.start();
        machine.handle(TxEvent::Ack);
        let actions = machine.handle(TxEvent::Can);
        assert_eq!(
            actions,
            vec![TxAction::RetryAfter(Duration::from_millis(100))]
        );
        assert_eq!(machine.stage(), TransactionStage::Created);
    }

    #[test]
    fn send_data_full_flow() {
        let mut machine = send_data_machine(true);
        machine.start();
        machine.handle(TxEvent::Ack);

        let response = send_data_response(true);
        assert!(machine.wants(&response));
        let actions = machine.handle(TxEvent::Message(&response));
        assert_eq!(
            actions,
            vec![TxAction::StartTimer(TimerKind::Callback, Duration::from_secs(65))]
        );

        let callback = send_data_callback(TransmitStatus::Ok);
        assert!(machine.wants(&callback));
        let actions = machine.handle(TxEvent::Message(&callback));
        assert_eq!(actions, vec![TxAction::Complete(Some(callback))]);
    }

    #[test]
    fn send_data_rejected_response_retries() {
        let mut machine = send_data_machine(true);
        machine.start();
        machine.handle(TxEvent::Ack);
        let response = send_data_response(false);
        let actions = machine.handle(TxEvent::Message(&response));
        assert_eq!(
            actions,
            vec![TxAction::RetryAfter(Duration::from_millis(100))]
        );
    }

    #[test]
    fn no_ack_listening_retries_once_then_fails() {
        let mut machine = send_data_machine(true);
        machine.start();
        machine.handle(TxEvent::Ack);
        machine.handle(TxEvent::Message(&send_data_response(true)));

        let callback = send_data_callback(TransmitStatus::NoAck);
        let actions = machine.handle(TxEvent::Message(&callback));
        assert!(matches!(actions[0], TxAction::RetryAfter(_)));

        machine.start();
        machine.handle(TxEvent::Ack);
        machine.handle(TxEvent::Message(&send_data_response(true)));
        let actions = machine.handle(TxEvent::Message(&callback));
        assert_eq!(actions, vec![TxAction::Fail(TransactionFailure::NodeTimeout)]);
    }

    #[test]
    fn no_ack_sleeping_parks() {
        let mut machine = send_data_machine(false);
        machine.start();
        machine.handle(TxEvent::Ack);
        machine.handle(TxEvent::Message(&send_data_response(true)));

        let callback = send_data_callback(TransmitStatus::NoAck);
        let actions = machine.handle(TxEvent::Message(&callback));
        assert_eq!(actions, vec![TxAction::Park]);
    }

    #[test]
    fn transmit_failure_fails() {
        let mut machine = send_data_machine(true);
        machine.start();
        machine.handle(TxEvent::Ack);
        machine.handle(TxEvent::Message(&send_data_response(true)));
        let actions = machine.handle(TxEvent::Message(&send_data_callback(TransmitStatus::Fail)));
        assert_eq!(
            actions,
            vec![TxAction::Fail(TransactionFailure::ControllerFailure)]
        );
    }

    #[test]
    fn callback_timeout_fails() {
        let mut machine = send_data_machine(true);
        machine.start();
        machine.handle(TxEvent::Ack);
        machine.handle(TxEvent::Message(&send_data_response(true)));
        assert_eq!(
            machine.handle(TxEvent::Timer(TimerKind::Callback)),
            vec![TxAction::Fail(TransactionFailure::CallbackTimeout)]
        );
    }

    #[test]
    fn unrelated_messages_not_wanted() {
        let machine = send_data_machine(true);
        // Still in Created: nothing is wanted.
        assert!(!machine.wants(&version_response()));
    }

    #[test]
    fn backoff_squares() {
        assert_eq!(backoff_duration(1), Duration::from_millis(100));
        assert_eq!(backoff_duration(2), Duration::from_millis(400));
        assert_eq!(backoff_duration(3), Duration::from_millis(900));
    }
}
