//! Synthetic invoice documents for tests.

use lopdf::{dictionary, Document, Object, Stream};

/// A minimal ZUGFeRD 2.x (CII) invoice with the given routing fields.
pub fn cii_invoice_xml(date: &str, email: &str, number: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rsm:CrossIndustryInvoice xmlns:rsm="urn:un:unece:uncefact:data:standard:CrossIndustryInvoice:100"
    xmlns:ram="urn:un:unece:uncefact:data:standard:ReusableAggregateBusinessInformationEntity:100"
    xmlns:udt="urn:un:unece:uncefact:data:standard:UnqualifiedDataType:100">
  <rsm:ExchangedDocumentContext>
    <ram:GuidelineSpecifiedDocumentContextParameter>
      <ram:ID>urn:cen.eu:en16931:2017</ram:ID>
    </ram:GuidelineSpecifiedDocumentContextParameter>
  </rsm:ExchangedDocumentContext>
  <rsm:ExchangedDocument>
    <ram:ID>{number}</ram:ID>
    <ram:TypeCode>380</ram:TypeCode>
    <ram:IssueDateTime>
      <udt:DateTimeString format="102">{date}</udt:DateTimeString>
    </ram:IssueDateTime>
  </rsm:ExchangedDocument>
  <rsm:SupplyChainTradeTransaction>
    <ram:ApplicableHeaderTradeAgreement>
      <ram:SellerTradeParty>
        <ram:Name>Lieferant GmbH</ram:Name>
        <ram:URIUniversalCommunication>
          <ram:URIID schemeID="EM">rechnung@lieferant.example</ram:URIID>
        </ram:URIUniversalCommunication>
      </ram:SellerTradeParty>
      <ram:BuyerTradeParty>
        <ram:Name>Kunde GmbH</ram:Name>
        <ram:DefinedTradeContact>
          <ram:EmailURIUniversalCommunication>
            <ram:URIID>{email}</ram:URIID>
          </ram:EmailURIUniversalCommunication>
        </ram:DefinedTradeContact>
      </ram:BuyerTradeParty>
    </ram:ApplicableHeaderTradeAgreement>
  </rsm:SupplyChainTradeTransaction>
</rsm:CrossIndustryInvoice>
"#
    )
}

/// A one-page PDF carrying `xml` as `factur-x.xml`.
pub fn zugferd_pdf(xml: &str) -> Vec<u8> {
    pdf_with_attachments(&[("factur-x.xml", xml)], false)
}

/// A one-page PDF with no attachments at all.
pub fn plain_pdf() -> Vec<u8> {
    pdf_with_attachments(&[], false)
}

/// A one-page PDF with the given `(file name, content)` attachments,
/// registered both in the `/EmbeddedFiles` name tree and in `/AF`.
pub fn pdf_with_attachments(files: &[(&str, &str)], compress: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");

    let content_id = doc.add_object(Object::Stream(Stream::new(
        dictionary! {},
        b"BT /F1 12 Tf 72 720 Td (Rechnung) Tj ET".to_vec(),
    )));
    let page_id = doc.add_object(dictionary! {
        "Type" => Object::Name(b"Page".to_vec()),
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        "Contents" => Object::Reference(content_id),
    });
    let pages_id = doc.add_object(dictionary! {
        "Type" => Object::Name(b"Pages".to_vec()),
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => Object::Integer(1),
    });
    if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(page_id) {
        dict.set("Parent", Object::Reference(pages_id));
    }

    let mut names = Vec::new();
    let mut associated = Vec::new();
    for (name, content) in files {
        let mut stream = Stream::new(
            dictionary! {
                "Type" => Object::Name(b"EmbeddedFile".to_vec()),
            },
            content.as_bytes().to_vec(),
        );
        if compress {
            stream.compress().expect("compress fixture stream");
        } else {
            stream.allows_compression = false;
        }
        let stream_id = doc.add_object(Object::Stream(stream));
        let spec_id = doc.add_object(dictionary! {
            "Type" => Object::Name(b"Filespec".to_vec()),
            "F" => Object::string_literal(*name),
            "UF" => Object::string_literal(*name),
            "AFRelationship" => Object::Name(b"Alternative".to_vec()),
            "EF" => dictionary! {
                "F" => Object::Reference(stream_id),
            },
        });
        names.push(Object::string_literal(*name));
        names.push(Object::Reference(spec_id));
        associated.push(Object::Reference(spec_id));
    }

    let mut catalog = dictionary! {
        "Type" => Object::Name(b"Catalog".to_vec()),
        "Pages" => Object::Reference(pages_id),
    };
    if !files.is_empty() {
        catalog.set(
            "Names",
            dictionary! {
                "EmbeddedFiles" => dictionary! {
                    "Names" => names,
                },
            },
        );
        catalog.set("AF", associated);
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("write fixture PDF");
    buf
}
