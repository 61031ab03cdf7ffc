use crate::gatt::characteristic;
use crate::gatt::peripheral_event::{
    PeripheralEvent, PeripheralRequest, ReadRequestResponse, RequestResponse,
};
use crate::gatt::properties::CharacteristicProperty;
use crate::gatt::service;
use bluer::gatt::local::{
    Characteristic, CharacteristicNotifier, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicRead, CharacteristicReadRequest, ReqError, Service,
};
use futures::FutureExt;
use log::{debug, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc::Sender, oneshot};
use uuid::Uuid;

pub fn parse_service(
    service: &service::Service,
    sender_tx: Sender<PeripheralEvent>,
    request_ids: Arc<AtomicU32>,
) -> Service {
    let characteristics = service
        .characteristics
        .iter()
        .map(|c| parse_characteristic(c, service.uuid, sender_tx.clone(), request_ids.clone()))
        .collect();
    Service {
        uuid: service.uuid,
        primary: service.primary,
        characteristics,
        ..Default::default()
    }
}

fn parse_characteristic(
    characteristic: &characteristic::Characteristic,
    service_uuid: Uuid,
    sender_tx: Sender<PeripheralEvent>,
    request_ids: Arc<AtomicU32>,
) -> Characteristic {
    let characteristic_uuid = characteristic.uuid;
    let mut char_read: Option<CharacteristicRead> = None;
    let mut char_notify: Option<CharacteristicNotify> = None;

    if characteristic.has_property(CharacteristicProperty::Read) {
        let read_sender = sender_tx.clone();
        char_read = Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |request: CharacteristicReadRequest| {
                let sender_tx = read_sender.clone();
                let request_id = request_ids.fetch_add(1, Ordering::Relaxed);
                async move {
                    on_read_request(
                        sender_tx,
                        request,
                        request_id,
                        service_uuid,
                        characteristic_uuid,
                    )
                    .await
                }
                .boxed()
            }),
            ..Default::default()
        });
    }

    if characteristic.has_property(CharacteristicProperty::Notify) {
        let notify_sender = sender_tx.clone();
        char_notify = Some(CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(
                move |notifier: CharacteristicNotifier| {
                    let sender_tx = notify_sender.clone();
                    async move {
                        on_char_notify(sender_tx, notifier, service_uuid, characteristic_uuid)
                            .await
                    }
                    .boxed()
                },
            )),
            ..Default::default()
        });
    }

    Characteristic {
        uuid: characteristic_uuid,
        read: char_read,
        notify: char_notify,
        ..Default::default()
    }
}

async fn on_read_request(
    sender_tx: Sender<PeripheralEvent>,
    request: CharacteristicReadRequest,
    request_id: u32,
    service_uuid: Uuid,
    characteristic: Uuid,
) -> Result<Vec<u8>, ReqError> {
    let (responder, response) = oneshot::channel();
    let event = PeripheralEvent::ReadRequest {
        request: PeripheralRequest {
            client: request.device_address.to_string(),
            service: service_uuid,
            characteristic,
        },
        request_id,
        offset: request.offset,
        responder,
    };
    if let Err(err) = sender_tx.send(event).await {
        warn!("error sending read request event: {}", err);
        return Err(ReqError::Failed);
    }
    match response.await {
        Ok(ReadRequestResponse {
            value,
            response: RequestResponse::Success,
            ..
        }) => Ok(value),
        Ok(ReadRequestResponse { response, .. }) => {
            debug!("read {} answered with {:?}", request_id, response);
            Err(match response {
                RequestResponse::RequestNotSupported => ReqError::NotSupported,
                RequestResponse::InvalidOffset => ReqError::InvalidOffset,
                RequestResponse::Success => ReqError::Failed,
            })
        }
        // Left unanswered: fall back to what BlueZ does for unknown reads.
        Err(_) => Err(ReqError::NotSupported),
    }
}

async fn on_char_notify(
    sender_tx: Sender<PeripheralEvent>,
    notifier: CharacteristicNotifier,
    service_uuid: Uuid,
    characteristic: Uuid,
) {
    // BlueZ does not say which device subscribed.
    let request = PeripheralRequest {
        client: String::new(),
        service: service_uuid,
        characteristic,
    };
    let subscribed = PeripheralEvent::CharacteristicSubscriptionUpdate {
        request: request.clone(),
        subscribed: true,
    };
    if let Err(err) = sender_tx.send(subscribed).await {
        warn!("error sending subscription event: {}", err);
    }
    notifier.stopped().await;
    let unsubscribed = PeripheralEvent::CharacteristicSubscriptionUpdate {
        request,
        subscribed: false,
    };
    if let Err(err) = sender_tx.send(unsubscribed).await {
        warn!("error sending subscription event: {}", err);
    }
}
