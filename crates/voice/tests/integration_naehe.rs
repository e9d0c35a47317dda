//! Integration-Tests fuer Hoerbarkeit, Abonnements und Handshakes im Raum

mod gemeinsam;

use gemeinsam::{synchronisieren, takt, Welt};
use roguetalk_core::types::Position;
use roguetalk_voice::pipeline::AufnahmeErgebnis;
use roguetalk_voice::session::TeilnehmerZustand;
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[tokio::test]
async fn hysterese_verhindert_flattern_der_abonnements() {
    let welt = Welt::new();
    let t = Instant::now();
    let mut a = welt.spieler(Position::new(0, 0)).await;
    let mut b = welt.spieler(Position::new(5, 0)).await;
    synchronisieren(&mut [&mut a, &mut b], t).await;

    takt(&mut [&mut a, &mut b], t).await;
    assert_eq!(a.verbindung.abonnements(), 1);
    assert!(welt.relais.hat_abo(&welt.raum, &b.id, &a.id));

    // Pendeln zwischen 9 und 11 bleibt innerhalb von d_out
    for x in [9, 11, 9, 11] {
        welt.bewegen(&b, Position::new(x, 0));
        takt(&mut [&mut a, &mut b], t).await;
        assert_eq!(a.verbindung.abonnements(), 1);
        assert_eq!(a.verbindung.abbestellungen(), 0);
    }

    welt.bewegen(&b, Position::new(13, 0));
    takt(&mut [&mut a, &mut b], t).await;
    assert_eq!(a.verbindung.abbestellungen(), 1);
    assert!(!welt.relais.hat_abo(&welt.raum, &b.id, &a.id));

    // d_in ist inklusiv
    welt.bewegen(&b, Position::new(10, 0));
    takt(&mut [&mut a, &mut b], t).await;
    assert_eq!(a.verbindung.abonnements(), 2);
    assert!(welt.relais.hat_abo(&welt.raum, &b.id, &a.id));
}

#[tokio::test]
async fn wiederholter_tick_ohne_bewegung_aendert_nichts() {
    let welt = Welt::new();
    let t = Instant::now();
    let mut a = welt.spieler(Position::new(0, 0)).await;
    let mut b = welt.spieler(Position::new(4, 3)).await;
    synchronisieren(&mut [&mut a, &mut b], t).await;
    takt(&mut [&mut a, &mut b], t).await;

    let vorher = a.sitzung.leser().snapshot();
    for _ in 0..3 {
        let diff = a.sitzung.proximity_tick(t).await.unwrap();
        assert!(diff.ist_leer());
    }
    let nachher = a.sitzung.leser().snapshot();
    assert_eq!(vorher.hoerbar, nachher.hoerbar);
    assert_eq!(a.verbindung.abonnements(), 1);
    assert!(a.schluessel().lock().hat_paar_sitzung(&b.id));
    assert_eq!(a.metriken.handshakes_abgeschlossen.get(), 1);
}

#[tokio::test]
async fn annaeherung_startet_handshake_und_audio_fliesst() {
    let welt = Welt::new();
    let t = Instant::now();
    let mut a = welt.spieler(Position::new(0, 0)).await;
    let mut b = welt.spieler(Position::new(15, 0)).await;
    synchronisieren(&mut [&mut a, &mut b], t).await;
    takt(&mut [&mut a, &mut b], t).await;

    // Zu weit weg: kein Handshake, kein Abo, nichts wird gesendet
    assert!(!a.schluessel().lock().hat_paar_sitzung(&b.id));
    assert!(!a.schluessel().lock().handshake_ausstehend(&b.id));
    assert!(!b.schluessel().lock().handshake_ausstehend(&a.id));
    assert_eq!(a.verbindung.abonnements(), 0);
    assert_eq!(b.verbindung.abonnements(), 0);
    assert_eq!(a.aufnahme.tick().unwrap(), AufnahmeErgebnis::Unterdrueckt);

    welt.bewegen(&b, Position::new(8, 0));
    takt(&mut [&mut a, &mut b], t).await;

    assert!(a.schluessel().lock().hat_paar_sitzung(&b.id));
    assert!(b.schluessel().lock().hat_paar_sitzung(&a.id));
    let epoche_a = a.schluessel().lock().aktuelle_epoche().unwrap();
    assert!(b.schluessel().lock().hat_empfangs_schluessel(&a.id, epoche_a));
    assert!(a.sitzung.ist_abonniert(&b.id));
    assert!(b.sitzung.ist_abonniert(&a.id));
    assert_eq!(a.sitzung.zustand(&b.id), Some(TeilnehmerZustand::Active));
    assert_eq!(
        b.sitzung.leser().current_audible_set(&b.id),
        HashSet::from([a.id])
    );

    for _ in 0..10 {
        assert!(matches!(
            a.aufnahme.tick().unwrap(),
            AufnahmeErgebnis::Gesendet { .. }
        ));
        b.mixer().tick_zum(t).unwrap();
    }
    let statistik = b.mixer().statistik(&a.id).unwrap().clone();
    assert_eq!(statistik.entschluesselt, 10);
    assert_eq!(statistik.verworfen, 0);
    assert!(gemeinsam::spitzenwert(&b.wiedergabe) > 0.05);
    // Mischung bleibt begrenzt
    assert!(gemeinsam::spitzenwert(&b.wiedergabe) <= 1.0);

    welt.bewegen(&b, Position::new(20, 0));
    takt(&mut [&mut a, &mut b], t).await;
    takt(&mut [&mut a, &mut b], t).await;

    assert_eq!(a.verbindung.abbestellungen(), 1);
    assert_eq!(b.verbindung.abbestellungen(), 1);
    assert!(a.schluessel().lock().paar_loeschbar(&b.id));
    assert!(b.schluessel().lock().paar_loeschbar(&a.id));
    assert!(a.sitzung.leser().current_audible_set(&a.id).is_empty());
    assert_eq!(a.aufnahme.tick().unwrap(), AufnahmeErgebnis::Unterdrueckt);

    // Nach dem Kulanzfenster ist die Paar-Sitzung weg
    let spaeter = t + Duration::from_secs(3);
    a.sitzung.proximity_tick(spaeter).await.unwrap();
    assert!(!a.schluessel().lock().hat_paar_sitzung(&b.id));
}

#[tokio::test]
async fn verdeckung_durch_wand_macht_unhoerbar() {
    use roguetalk_core::types::LevelId;
    use roguetalk_voice::level::RasterKarte;
    use std::sync::Arc;

    let welt = Welt::new();
    let karte = RasterKarte::aus_text(
        "....#....\n\
         ....#....\n\
         .........",
    );
    welt.level.karte_setzen(LevelId::new("main"), Arc::new(karte));

    let t = Instant::now();
    let mut a = welt.spieler(Position::new(0, 0)).await;
    let mut b = welt.spieler(Position::new(8, 0)).await;
    synchronisieren(&mut [&mut a, &mut b], t).await;
    takt(&mut [&mut a, &mut b], t).await;
    assert!(a.sitzung.leser().current_audible_set(&a.id).is_empty());
    assert_eq!(a.verbindung.abonnements(), 0);

    welt.bewegen(&b, Position::new(8, 2));
    welt.bewegen(&a, Position::new(0, 2));
    takt(&mut [&mut a, &mut b], t).await;
    assert_eq!(
        a.sitzung.leser().current_audible_set(&a.id),
        HashSet::from([b.id])
    );
}

#[tokio::test]
async fn handshake_timeout_macht_unhoerbar_bis_zum_neuversuch() {
    let welt = Welt::new();
    let t = Instant::now();
    let mut a = welt.spieler(Position::new(0, 0)).await;
    // b verarbeitet nie Ereignisse und antwortet deshalb nicht
    let b = welt.spieler(Position::new(3, 0)).await;
    synchronisieren(&mut [&mut a], t).await;

    a.sitzung.proximity_tick(t).await.unwrap();
    assert!(a.schluessel().lock().handshake_ausstehend(&b.id));
    assert!(a.sitzung.ist_abonniert(&b.id));

    let timeout = welt.config.schluessel.key_manager_config().handshake_timeout;
    a.sitzung.proximity_tick(t + timeout).await.unwrap();
    assert_eq!(a.metriken.handshake_timeouts.get(), 1);
    assert!(!a.schluessel().lock().handshake_ausstehend(&b.id));
    assert!(!a.sitzung.ist_abonniert(&b.id));
    assert_eq!(a.verbindung.abbestellungen(), 1);
    assert!(a.sitzung.leser().current_audible_set(&a.id).is_empty());
    // Die Sitzung laeuft weiter
    assert!(!a.sitzung.ist_beendet());

    // Naechster Tick versucht es erneut
    a.sitzung
        .proximity_tick(t + timeout + Duration::from_millis(100))
        .await
        .unwrap();
    assert!(a.schluessel().lock().handshake_ausstehend(&b.id));
    assert_eq!(a.metriken.handshakes_gestartet.get(), 2);
    assert_eq!(a.verbindung.abonnements(), 2);
}

#[tokio::test]
async fn gleichzeitige_handshakes_ergeben_eine_paar_sitzung() {
    let welt = Welt::new();
    let t = Instant::now();
    let mut a = welt.spieler(Position::new(0, 0)).await;
    let mut b = welt.spieler(Position::new(2, 0)).await;
    synchronisieren(&mut [&mut a, &mut b], t).await;

    // Beide ticken bevor einer die Nachricht des anderen sieht
    a.sitzung.proximity_tick(t).await.unwrap();
    b.sitzung.proximity_tick(t).await.unwrap();
    assert!(a.schluessel().lock().handshake_ausstehend(&b.id));
    assert!(b.schluessel().lock().handshake_ausstehend(&a.id));

    synchronisieren(&mut [&mut a, &mut b], t).await;
    assert!(a.schluessel().lock().hat_paar_sitzung(&b.id));
    assert!(b.schluessel().lock().hat_paar_sitzung(&a.id));
    assert!(!a.schluessel().lock().handshake_ausstehend(&b.id));
    assert!(!b.schluessel().lock().handshake_ausstehend(&a.id));

    let epoche_a = a.schluessel().lock().aktuelle_epoche().unwrap();
    let epoche_b = b.schluessel().lock().aktuelle_epoche().unwrap();
    assert!(b.schluessel().lock().hat_empfangs_schluessel(&a.id, epoche_a));
    assert!(a.schluessel().lock().hat_empfangs_schluessel(&b.id, epoche_b));
}
